//=====================================================
// File: renderer.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Renderer collaborator boundary
// Objective: Single opaque op(tag, args) entry point so the
//            core never learns screen/canvas semantics
//=====================================================

use crate::errors::ZexusError;
use crate::object::Object;

/// The terminal UI collaborator. The core forwards renderer builtins and
/// `RENDER_OP` instructions here and never inspects tag semantics.
pub trait RendererBackend {
    fn op(&mut self, tag: &str, args: Vec<Object>) -> Result<Object, ZexusError>;
}

/// Backend that accepts every operation and returns `null`. Default for
/// embedders that run headless.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl RendererBackend for NullRenderer {
    fn op(&mut self, _tag: &str, _args: Vec<Object>) -> Result<Object, ZexusError> {
        Ok(Object::Null)
    }
}

/// Backend that records every delegated call, for tests. Clones share the
/// same call log so a test can keep a handle while the engine owns the box.
#[derive(Debug, Default, Clone)]
pub struct RecordingRenderer {
    calls: std::rc::Rc<std::cell::RefCell<Vec<(String, Vec<Object>)>>>,
}

impl RecordingRenderer {
    pub fn calls(&self) -> Vec<(String, Vec<Object>)> {
        self.calls.borrow().clone()
    }

    pub fn tags(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(tag, _)| tag.clone()).collect()
    }
}

impl RendererBackend for RecordingRenderer {
    fn op(&mut self, tag: &str, args: Vec<Object>) -> Result<Object, ZexusError> {
        self.calls.borrow_mut().push((tag.to_string(), args));
        Ok(Object::Null)
    }
}

/// Builtin names forwarded verbatim to the renderer collaborator.
pub const RENDER_BUILTINS: &[&str] = &[
    "define_screen",
    "define_component",
    "render_screen",
    "add_to_screen",
    "set_theme",
    "mix",
    "create_canvas",
    "draw_line",
    "draw_circle",
    "draw_rectangle",
    "draw_text",
    "create_animation",
    "start_animation",
];

pub fn is_render_builtin(name: &str) -> bool {
    RENDER_BUILTINS.contains(&name)
}
