//=====================================================
// File: config.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Process-wide Zexus configuration flags
// Objective: Expose syntax style and parser/debug toggles
//            with process lifetime
//=====================================================

use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Which surface style the production parser is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxStyle {
    /// Parens + braces only.
    Universal,
    /// Additionally accepts colon-blocks (`if cond: ...`).
    Tolerable,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub syntax_style: SyntaxStyle,
    pub enable_advanced_parsing: bool,
    pub enable_debug_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            syntax_style: SyntaxStyle::Universal,
            enable_advanced_parsing: true,
            enable_debug_logs: false,
        }
    }
}

static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

pub fn current() -> Config {
    CONFIG.read().clone()
}

pub fn set_syntax_style(style: SyntaxStyle) {
    CONFIG.write().syntax_style = style;
}

pub fn set_advanced_parsing(enabled: bool) {
    CONFIG.write().enable_advanced_parsing = enabled;
}

pub fn set_debug_logs(enabled: bool) {
    CONFIG.write().enable_debug_logs = enabled;
}

/// Gated debug channel used by the pipeline and the `debug_log` builtin.
pub fn debug_log(message: &str) {
    if current().enable_debug_logs {
        eprintln!("[zexus:debug] {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.syntax_style, SyntaxStyle::Universal);
        assert!(config.enable_advanced_parsing);
        assert!(!config.enable_debug_logs);
    }
}
