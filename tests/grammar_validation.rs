//=============================================
// tests/grammar_validation.rs
//=============================================
// Purpose: Grammar-level invariants shared by the two parsers:
//          lexeme fidelity, tolerant-parser totality, and
//          structural equivalence of the two AST sets.
//=============================================

use zexus::ast as ia;
use zexus::compiler::ast as ca;
use zexus::compiler::parser::ProductionParser;
use zexus::lexer;
use zexus::parser::TolerantParser;

//=============================================
//            Lexeme fidelity
//=============================================

/// Every token's lexeme reproduces the exact source slice it came from.
#[test]
fn lexemes_match_source_slices() {
    let sources = [
        "let x = 5 + 3.25 * (2 - 1)",
        "action async go(a, b) { return a && b }",
        "let m = { \"k\": [1, 2], other: \"v\" } // trailing comment",
        "if a <= b: print(\"ok\")",
    ];
    for source in sources {
        let chars: Vec<char> = source.chars().collect();
        for token in lexer::tokenize(source).unwrap() {
            if token.lexeme.is_empty() {
                continue;
            }
            let start = token.position.offset;
            let end = start + token.lexeme.chars().count();
            let slice: String = chars[start..end].iter().collect();
            assert_eq!(slice, token.lexeme, "token {:?} in {:?}", token, source);
        }
    }
}

//=============================================
//            Tolerant-parser totality
//=============================================

/// The tolerant parser returns a Program for arbitrary input, and its
/// diagnostics list is empty exactly when the production parser accepts.
#[test]
fn tolerant_parser_is_total_and_tracks_production_acceptance() {
    let accepted = [
        "let x = 1",
        "print(string(1 + 2))",
        "try { let x = 1 } catch err { print(err) }",
        "let m = { a: 1; b: 2, }",
        "action f(x) { return x } f(1)",
    ];
    for source in accepted {
        let (_, diagnostics) = TolerantParser::parse_source(source);
        assert!(
            diagnostics.is_empty(),
            "tolerant diagnostics for accepted source {:?}: {:?}",
            source,
            diagnostics
        );
        let tokens = lexer::tokenize(source).unwrap();
        assert!(
            ProductionParser::new(tokens).parse_program().is_ok(),
            "production parser rejected {:?}",
            source
        );
    }

    let rejected = [
        "let = 5",
        "action () {}",
        "let m = { : 1 }",
        "while { }",
        "let x = @ 5",
        "exactly thing { }",
    ];
    for source in rejected {
        let (_, diagnostics) = TolerantParser::parse_source(source);
        assert!(
            !diagnostics.is_empty(),
            "expected diagnostics for {:?}",
            source
        );
        if let Ok(tokens) = lexer::tokenize(source) {
            assert!(
                ProductionParser::new(tokens).parse_program().is_err(),
                "production parser accepted {:?}",
                source
            );
        }
    }
}

//=============================================
//            Parser equivalence
//=============================================

/// For sources both parsers accept, the two ASTs have the same shape: same
/// node kinds, literal values and binding names.
#[test]
fn parsers_agree_on_shared_programs() {
    let sources = [
        "let x = 1 + 2 * 3",
        "print(string((1 + 2) * 3))",
        "let m = { \"a\": 1, b: 2; c: 3, }",
        "let l = [1, 2.5, \"x\", true, null]",
        "action make(n) { let c = n action inc() { c = c + 1 return c } return inc }",
        "let f = lambda x -> x * 2 let g = lambda(a, b) -> a + b",
        "try { let x = 10 / 0 } catch(err) { print(string(err)) }",
        "for each item in [1, 2] { print(string(item)) }",
        "if a { print(\"t\") } else if b { print(\"e\") } else { print(\"n\") }",
        "while i < 10 { i = i + 1 }",
        "event E { x: integer } emit E { x: 7 }",
        "enum Color { Red, Green, Blue }",
        "protocol P { action f(a) } contract C { require P storage { t: 1 } action f(a) { return a } }",
        "external fetch_page from \"net\" use math as m export let shared = 1",
        "debug \"checkpoint\", 42",
        "screen home { width: 80 } component button { text: \"go\" } theme dark { fg: \"white\" }",
        "let v = if x { 1 } else { 2 } let w = await v",
        "nums.map(lambda(n)->n*2) obj.field obj[0] obj.field = 3",
        "action async poll() { return await 1 } let t = spawn(poll())",
    ];
    for source in sources {
        let tokens = lexer::tokenize(source).unwrap();
        let (ia_program, diagnostics) = TolerantParser::parse(&tokens);
        assert!(
            diagnostics.is_empty(),
            "tolerant diagnostics for {:?}: {:?}",
            source,
            diagnostics
        );
        let ca_program = ProductionParser::new(tokens)
            .parse_program()
            .unwrap_or_else(|e| panic!("production parse of {:?}: {}", source, e));
        let ia_shape: Vec<String> = ia_program.statements.iter().map(ia_stmt_shape).collect();
        let ca_shape: Vec<String> = ca_program.statements.iter().map(ca_stmt_shape).collect();
        assert_eq!(ia_shape, ca_shape, "shape mismatch for {:?}", source);
    }
}

//=============================================
//            Shape printers
//=============================================
// One s-expression per node; the two printers must emit identical text for
// equivalent programs, so any shape drift between the AST sets fails here.

fn ia_stmt_shape(stmt: &ia::Stmt) -> String {
    match stmt {
        ia::Stmt::Let { name, value, .. } => {
            format!("(let {} {})", name, ia_expr_shape(value))
        }
        ia::Stmt::Return { value, .. } => match value {
            Some(value) => format!("(return {})", ia_expr_shape(value)),
            None => "(return)".to_string(),
        },
        ia::Stmt::Expression { expr, .. } => format!("(expr {})", ia_expr_shape(expr)),
        ia::Stmt::Block { statements, .. } => shape_block(
            statements.iter().map(ia_stmt_shape).collect::<Vec<_>>(),
        ),
        ia::Stmt::Print { value, .. } => format!("(print {})", ia_expr_shape(value)),
        ia::Stmt::ForEach {
            variable,
            iterable,
            body,
            ..
        } => format!(
            "(for-each {} {} {})",
            variable,
            ia_expr_shape(iterable),
            ia_stmt_shape(body)
        ),
        ia::Stmt::If {
            condition,
            consequence,
            alternative,
            ..
        } => format!(
            "(if {} {}{})",
            ia_expr_shape(condition),
            ia_stmt_shape(consequence),
            match alternative {
                Some(alternative) => format!(" {}", ia_stmt_shape(alternative)),
                None => String::new(),
            }
        ),
        ia::Stmt::While {
            condition, body, ..
        } => format!("(while {} {})", ia_expr_shape(condition), ia_stmt_shape(body)),
        ia::Stmt::TryCatch {
            body,
            error_name,
            handler,
            ..
        } => format!(
            "(try {} {} {})",
            ia_stmt_shape(body),
            error_name,
            ia_stmt_shape(handler)
        ),
        ia::Stmt::Action { decl } => ia_action_shape(decl),
        ia::Stmt::Event { decl } => format!(
            "(event {} [{}])",
            decl.name,
            decl.fields
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ia::Stmt::Emit { name, payload, .. } => format!(
            "(emit {} {})",
            name,
            payload
                .iter()
                .map(|(k, v)| format!("{}:{}", k, ia_expr_shape(v)))
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ia::Stmt::Enum { name, variants, .. } => format!(
            "(enum {} [{}])",
            name,
            variants
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ia::Stmt::Protocol { decl } => format!(
            "(protocol {} [{}])",
            decl.name,
            decl.signatures
                .iter()
                .map(|s| format!("{}/{}", s.name, s.params.len()))
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ia::Stmt::Contract { decl } => format!(
            "(contract {} {} [{}] [{}])",
            decl.name,
            decl.protocol
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "_".to_string()),
            decl.storage
                .iter()
                .map(|(k, v)| format!("{}:{}", k, ia_expr_shape(v)))
                .collect::<Vec<_>>()
                .join(" "),
            decl.actions.iter().map(ia_action_shape).collect::<Vec<_>>().join(" ")
        ),
        ia::Stmt::External { name, source, .. } => format!(
            "(external {} {})",
            name,
            source.as_deref().unwrap_or("_")
        ),
        ia::Stmt::Export { inner, .. } => format!("(export {})", ia_stmt_shape(inner)),
        ia::Stmt::Debug { message, value, .. } => format!(
            "(debug {}{})",
            ia_expr_shape(message),
            match value {
                Some(value) => format!(" {}", ia_expr_shape(value)),
                None => String::new(),
            }
        ),
        ia::Stmt::Use { module, alias, .. } => format!(
            "(use {} {})",
            module,
            alias
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "_".to_string())
        ),
        ia::Stmt::ScreenDef {
            name, properties, ..
        } => format!("(screen {} {})", name, ia_expr_shape(properties)),
        ia::Stmt::ComponentDef {
            name, properties, ..
        } => format!("(component {} {})", name, ia_expr_shape(properties)),
        ia::Stmt::ThemeDef {
            name, properties, ..
        } => format!("(theme {} {})", name, ia_expr_shape(properties)),
    }
}

fn ia_action_shape(decl: &ia::ActionDecl) -> String {
    format!(
        "(action {} {} [{}] {})",
        decl.name
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "_".to_string()),
        if decl.is_async { "async" } else { "sync" },
        decl.params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" "),
        shape_block(decl.body.iter().map(ia_stmt_shape).collect())
    )
}

fn ia_expr_shape(expr: &ia::Expr) -> String {
    match expr {
        ia::Expr::Identifier { name, .. } => format!("(id {})", name),
        ia::Expr::Integer { value, .. } => format!("(int {})", value),
        ia::Expr::Float { value, .. } => format!("(float {})", value),
        ia::Expr::Str { value, .. } => format!("(str {:?})", value),
        ia::Expr::Bool { value, .. } => format!("(bool {})", value),
        ia::Expr::Null { .. } => "(null)".to_string(),
        ia::Expr::List { elements, .. } => format!(
            "(list {})",
            elements.iter().map(ia_expr_shape).collect::<Vec<_>>().join(" ")
        ),
        ia::Expr::Map { pairs, .. } => format!(
            "(map {})",
            pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", k, ia_expr_shape(v)))
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ia::Expr::ActionLiteral {
            params,
            body,
            is_async,
            ..
        } => format!(
            "(action _ {} [{}] {})",
            if *is_async { "async" } else { "sync" },
            params
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            shape_block(body.iter().map(ia_stmt_shape).collect())
        ),
        ia::Expr::Lambda { params, body, .. } => format!(
            "(lambda [{}] {})",
            params
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            ia_expr_shape(body)
        ),
        ia::Expr::Call { callee, args, .. } => format!(
            "(call {} {})",
            ia_expr_shape(callee),
            args.iter().map(ia_expr_shape).collect::<Vec<_>>().join(" ")
        ),
        ia::Expr::MethodCall {
            receiver,
            method,
            args,
            ..
        } => format!(
            "(method {} {} {})",
            ia_expr_shape(receiver),
            method,
            args.iter().map(ia_expr_shape).collect::<Vec<_>>().join(" ")
        ),
        ia::Expr::Property { object, name, .. } => {
            format!("(prop {} {})", ia_expr_shape(object), name)
        }
        ia::Expr::Index { object, index, .. } => {
            format!("(index {} {})", ia_expr_shape(object), ia_expr_shape(index))
        }
        ia::Expr::Assign { target, value, .. } => format!(
            "(assign {} {})",
            match target {
                ia::AssignTarget::Name(name) => format!("(id {})", name),
                ia::AssignTarget::Index { object, index } =>
                    format!("(index {} {})", ia_expr_shape(object), ia_expr_shape(index)),
                ia::AssignTarget::Property { object, name } =>
                    format!("(prop {} {})", ia_expr_shape(object), name),
            },
            ia_expr_shape(value)
        ),
        ia::Expr::Prefix {
            operator, operand, ..
        } => format!("(un {} {})", operator.symbol(), ia_expr_shape(operand)),
        ia::Expr::Infix {
            left,
            operator,
            right,
            ..
        } => format!(
            "(bin {} {} {})",
            operator.symbol(),
            ia_expr_shape(left),
            ia_expr_shape(right)
        ),
        ia::Expr::IfExpr {
            condition,
            consequence,
            alternative,
            ..
        } => format!(
            "(if-expr {} {} {})",
            ia_expr_shape(condition),
            ia_expr_shape(consequence),
            ia_expr_shape(alternative)
        ),
        ia::Expr::Await { inner, .. } => format!("(await {})", ia_expr_shape(inner)),
        ia::Expr::EmbeddedLiteral { language, .. } => format!("(embedded {})", language),
    }
}

fn ca_stmt_shape(stmt: &ca::Stmt) -> String {
    match stmt {
        ca::Stmt::Let { name, value, .. } => {
            format!("(let {} {})", name, ca_expr_shape(value))
        }
        ca::Stmt::Return { value, .. } => match value {
            Some(value) => format!("(return {})", ca_expr_shape(value)),
            None => "(return)".to_string(),
        },
        ca::Stmt::Expression { expr, .. } => format!("(expr {})", ca_expr_shape(expr)),
        ca::Stmt::Block { statements, .. } => shape_block(
            statements.iter().map(ca_stmt_shape).collect::<Vec<_>>(),
        ),
        ca::Stmt::Print { value, .. } => format!("(print {})", ca_expr_shape(value)),
        ca::Stmt::ForEach {
            variable,
            iterable,
            body,
            ..
        } => format!(
            "(for-each {} {} {})",
            variable,
            ca_expr_shape(iterable),
            ca_stmt_shape(body)
        ),
        ca::Stmt::If {
            condition,
            consequence,
            alternative,
            ..
        } => format!(
            "(if {} {}{})",
            ca_expr_shape(condition),
            ca_stmt_shape(consequence),
            match alternative {
                Some(alternative) => format!(" {}", ca_stmt_shape(alternative)),
                None => String::new(),
            }
        ),
        ca::Stmt::While {
            condition, body, ..
        } => format!("(while {} {})", ca_expr_shape(condition), ca_stmt_shape(body)),
        ca::Stmt::TryCatch {
            body,
            error_name,
            handler,
            ..
        } => format!(
            "(try {} {} {})",
            ca_stmt_shape(body),
            error_name,
            ca_stmt_shape(handler)
        ),
        ca::Stmt::Action { decl } => ca_action_shape(decl),
        ca::Stmt::Event { decl } => format!(
            "(event {} [{}])",
            decl.name,
            decl.fields
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ca::Stmt::Emit { name, payload, .. } => format!(
            "(emit {} {})",
            name,
            payload
                .iter()
                .map(|(k, v)| format!("{}:{}", k, ca_expr_shape(v)))
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ca::Stmt::Enum { name, variants, .. } => format!(
            "(enum {} [{}])",
            name,
            variants
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ca::Stmt::Protocol { decl } => format!(
            "(protocol {} [{}])",
            decl.name,
            decl.signatures
                .iter()
                .map(|s| format!("{}/{}", s.name, s.params.len()))
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ca::Stmt::Contract { decl } => format!(
            "(contract {} {} [{}] [{}])",
            decl.name,
            decl.protocol
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "_".to_string()),
            decl.storage
                .iter()
                .map(|(k, v)| format!("{}:{}", k, ca_expr_shape(v)))
                .collect::<Vec<_>>()
                .join(" "),
            decl.actions.iter().map(ca_action_shape).collect::<Vec<_>>().join(" ")
        ),
        ca::Stmt::External { name, source, .. } => format!(
            "(external {} {})",
            name,
            source.as_deref().unwrap_or("_")
        ),
        ca::Stmt::Export { inner, .. } => format!("(export {})", ca_stmt_shape(inner)),
        ca::Stmt::Debug { message, value, .. } => format!(
            "(debug {}{})",
            ca_expr_shape(message),
            match value {
                Some(value) => format!(" {}", ca_expr_shape(value)),
                None => String::new(),
            }
        ),
        // The compiler spells the interpreter's Use node as Import; both
        // normalize to the same label.
        ca::Stmt::Import { module, alias, .. } => format!(
            "(use {} {})",
            module,
            alias
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "_".to_string())
        ),
        ca::Stmt::ScreenDef {
            name, properties, ..
        } => format!("(screen {} {})", name, ca_expr_shape(properties)),
        ca::Stmt::ComponentDef {
            name, properties, ..
        } => format!("(component {} {})", name, ca_expr_shape(properties)),
        ca::Stmt::ThemeDef {
            name, properties, ..
        } => format!("(theme {} {})", name, ca_expr_shape(properties)),
    }
}

fn ca_action_shape(decl: &ca::ActionDecl) -> String {
    format!(
        "(action {} {} [{}] {})",
        decl.name
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "_".to_string()),
        if decl.is_async { "async" } else { "sync" },
        decl.params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" "),
        shape_block(decl.body.iter().map(ca_stmt_shape).collect())
    )
}

fn ca_expr_shape(expr: &ca::Expr) -> String {
    match expr {
        ca::Expr::Identifier { name, .. } => format!("(id {})", name),
        ca::Expr::Integer(value) => format!("(int {})", value),
        ca::Expr::Float(value) => format!("(float {})", value),
        ca::Expr::Str(value) => format!("(str {:?})", value),
        ca::Expr::Bool(value) => format!("(bool {})", value),
        ca::Expr::Null => "(null)".to_string(),
        ca::Expr::List(elements) => format!(
            "(list {})",
            elements.iter().map(ca_expr_shape).collect::<Vec<_>>().join(" ")
        ),
        ca::Expr::Map(pairs) => format!(
            "(map {})",
            pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", k, ca_expr_shape(v)))
                .collect::<Vec<_>>()
                .join(" ")
        ),
        ca::Expr::ActionLiteral { decl } => format!(
            "(action _ {} [{}] {})",
            if decl.is_async { "async" } else { "sync" },
            decl.params
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            shape_block(decl.body.iter().map(ca_stmt_shape).collect())
        ),
        ca::Expr::Lambda { params, body, .. } => format!(
            "(lambda [{}] {})",
            params
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            ca_expr_shape(body)
        ),
        ca::Expr::Call { callee, args, .. } => format!(
            "(call {} {})",
            ca_expr_shape(callee),
            args.iter().map(ca_expr_shape).collect::<Vec<_>>().join(" ")
        ),
        ca::Expr::MethodCall {
            receiver,
            method,
            args,
            ..
        } => format!(
            "(method {} {} {})",
            ca_expr_shape(receiver),
            method,
            args.iter().map(ca_expr_shape).collect::<Vec<_>>().join(" ")
        ),
        ca::Expr::Property { object, name } => {
            format!("(prop {} {})", ca_expr_shape(object), name)
        }
        ca::Expr::Index { object, index } => {
            format!("(index {} {})", ca_expr_shape(object), ca_expr_shape(index))
        }
        ca::Expr::Assign { target, value, .. } => format!(
            "(assign {} {})",
            match target {
                ca::AssignTarget::Name(name) => format!("(id {})", name),
                ca::AssignTarget::Index { object, index } =>
                    format!("(index {} {})", ca_expr_shape(object), ca_expr_shape(index)),
                ca::AssignTarget::Property { object, name } =>
                    format!("(prop {} {})", ca_expr_shape(object), name),
            },
            ca_expr_shape(value)
        ),
        ca::Expr::Prefix { operator, operand } => {
            format!("(un {} {})", operator.symbol(), ca_expr_shape(operand))
        }
        ca::Expr::Infix {
            left,
            operator,
            right,
        } => format!(
            "(bin {} {} {})",
            operator.symbol(),
            ca_expr_shape(left),
            ca_expr_shape(right)
        ),
        ca::Expr::IfExpr {
            condition,
            consequence,
            alternative,
        } => format!(
            "(if-expr {} {} {})",
            ca_expr_shape(condition),
            ca_expr_shape(consequence),
            ca_expr_shape(alternative)
        ),
        ca::Expr::Await { inner, .. } => format!("(await {})", ca_expr_shape(inner)),
        ca::Expr::EmbeddedLiteral { language, .. } => format!("(embedded {})", language),
    }
}

fn shape_block(statements: Vec<String>) -> String {
    format!("(block {})", statements.join(" "))
}
