//! Lowers the surface tree to the IR.
//!
//! Rules: literals become constants; `$$` becomes `Var("input")` (the entry
//! template's implicit binding); `$N` becomes a `get` call on that binding;
//! `and`/`or` desugar to a fresh-named `Let` plus `If`, which is what makes
//! them short-circuit; `let:`/`fn:` statements become `Let` nodes scoping
//! over the rest of their sequence; `assert` lowers to the `assert` builtin
//! so failures surface as runtime errors rather than effects.
//!
//! For every function literal the lowerer records the free variables that
//! resolve to an enclosing binding, in order of first use. Names bound
//! nowhere are left for the VM's global lookup to resolve or reject.

use ahash::AHashSet;

use crate::{
    ast::{Expr, Node},
    ir::{Constant, IrExpr, IrModule, IrNode},
};

/// The name the entry template binds in local slot 0.
pub const INPUT_NAME: &str = "input";

/// Lowers a parsed program to an IR module.
#[must_use]
pub fn lower(program: &Node) -> IrModule {
    let mut lowerer = Lowerer {
        bound: vec![INPUT_NAME.to_owned()],
        fresh: 0,
    };
    let body = match &program.expr {
        Expr::Seq(items) => lowerer.lower_seq(items, program),
        _ => lowerer.lower_seq(std::slice::from_ref(program), program),
    };
    IrModule { body }
}

struct Lowerer {
    /// Names bound in enclosing scopes, innermost last. Seeds with `input`.
    bound: Vec<String>,
    /// Counter for the fresh names used by the `and`/`or` desugaring. The
    /// `·` character cannot appear in a lexed identifier, so these never
    /// collide with user bindings.
    fresh: u32,
}

impl Lowerer {
    fn fresh_name(&mut self, kind: &str) -> String {
        let name = format!("\u{b7}{kind}{}", self.fresh);
        self.fresh += 1;
        name
    }

    fn lower_node(&mut self, node: &Node) -> IrNode {
        let span = Some(node.span);
        let expr = match &node.expr {
            Expr::Null => IrExpr::Const(Constant::Null),
            Expr::Bool(b) => IrExpr::Const(Constant::Bool(*b)),
            Expr::Number(n) => IrExpr::Const(Constant::Number(*n)),
            Expr::Str(s) => IrExpr::Const(Constant::Str(s.clone())),
            Expr::Regex { pattern, flags } => IrExpr::Const(Constant::Regex {
                pattern: pattern.clone(),
                flags: flags.clone(),
            }),
            Expr::Ident(name) => IrExpr::Var(name.clone()),
            Expr::Input => IrExpr::Var(INPUT_NAME.to_owned()),
            Expr::InputIndex(n) => IrExpr::Call {
                callee: Box::new(IrNode::new(IrExpr::Var("get".to_owned()), span)),
                args: vec![
                    IrNode::new(IrExpr::Var(INPUT_NAME.to_owned()), span),
                    IrNode::new(IrExpr::Const(Constant::Number(f64::from(*n))), span),
                ],
            },
            Expr::Call { callee, args } => IrExpr::Call {
                callee: Box::new(self.lower_node(callee)),
                args: args.iter().map(|a| self.lower_node(a)).collect(),
            },
            Expr::If { cond, then, els } => IrExpr::If {
                cond: Box::new(self.lower_node(cond)),
                then: Box::new(self.lower_node(then)),
                els: Box::new(self.lower_node(els)),
            },
            Expr::And(a, b) => return self.lower_short_circuit(node, a, b, true),
            Expr::Or(a, b) => return self.lower_short_circuit(node, a, b, false),
            Expr::Effect { name, args } if name == "assert" => IrExpr::Call {
                callee: Box::new(IrNode::new(IrExpr::Var("assert".to_owned()), span)),
                args: args.iter().map(|a| self.lower_node(a)).collect(),
            },
            Expr::Effect { name, args } => IrExpr::Effect {
                name: name.clone(),
                args: args.iter().map(|a| self.lower_node(a)).collect(),
            },
            Expr::Lambda { params, body } => return IrNode::new(self.lower_fn(params, body), span),
            Expr::Seq(items) => return self.lower_seq(items, node),
            // a bare trailing `let:`/`fn:` binds nothing downstream; the
            // sequence lowering is where these normally get their body
            Expr::Let { .. } | Expr::FnDef { .. } => {
                return self.lower_seq(std::slice::from_ref(node), node);
            }
        };
        IrNode::new(expr, span)
    }

    /// `(and a b)` → `let τ = a in if τ then b else τ`;
    /// `(or a b)` → `let τ = a in if τ then τ else b`.
    fn lower_short_circuit(&mut self, node: &Node, a: &Node, b: &Node, is_and: bool) -> IrNode {
        let span = Some(node.span);
        let tmp = self.fresh_name(if is_and { "and" } else { "or" });
        let value = self.lower_node(a);
        self.bound.push(tmp.clone());
        let rhs = self.lower_node(b);
        self.bound.pop();
        let var = |name: &str| IrNode::new(IrExpr::Var(name.to_owned()), span);
        let (then, els) = if is_and { (rhs, var(&tmp)) } else { (var(&tmp), rhs) };
        IrNode::new(
            IrExpr::Let {
                name: tmp.clone(),
                value: Box::new(value),
                body: Box::new(IrNode::new(
                    IrExpr::If {
                        cond: Box::new(var(&tmp)),
                        then: Box::new(then),
                        els: Box::new(els),
                    },
                    span,
                )),
            },
            span,
        )
    }

    /// Lowers a statement list: `let:` and `fn:` statements become `Let`
    /// nodes whose body is the rest of the sequence in that scope.
    fn lower_seq(&mut self, items: &[Node], seq_node: &Node) -> IrNode {
        let span = Some(seq_node.span);
        let Some((first, rest)) = items.split_first() else {
            return IrNode::new(IrExpr::Const(Constant::Null), span);
        };
        match &first.expr {
            Expr::Let { name, value } => {
                let value_ir = self.lower_node(value);
                self.bound.push(name.clone());
                let body = self.lower_seq(rest, seq_node);
                self.bound.pop();
                IrNode::new(
                    IrExpr::Let {
                        name: name.clone(),
                        value: Box::new(value_ir),
                        body: Box::new(body),
                    },
                    Some(first.span),
                )
            }
            Expr::FnDef { name, params, body } => {
                // the function's own name is in scope inside its body,
                // enabling recursion through the binding
                self.bound.push(name.clone());
                let fn_ir = IrNode::new(self.lower_fn(params, body), Some(first.span));
                let rest_ir = self.lower_seq(rest, seq_node);
                self.bound.pop();
                IrNode::new(
                    IrExpr::Let {
                        name: name.clone(),
                        value: Box::new(fn_ir),
                        body: Box::new(rest_ir),
                    },
                    Some(first.span),
                )
            }
            _ if rest.is_empty() => self.lower_node(first),
            _ => {
                let head = self.lower_node(first);
                let tail = self.lower_seq(rest, seq_node);
                match tail.expr {
                    // keep sibling statements flat rather than right-nested
                    IrExpr::Seq(mut nodes) => {
                        nodes.insert(0, head);
                        IrNode::new(IrExpr::Seq(nodes), span)
                    }
                    _ => IrNode::new(IrExpr::Seq(vec![head, tail]), span),
                }
            }
        }
    }

    fn lower_fn(&mut self, params: &[String], body: &Node) -> IrExpr {
        let depth = self.bound.len();
        self.bound.extend(params.iter().cloned());
        let body_ir = self.lower_node(body);
        self.bound.truncate(depth);

        let mut scope: Vec<String> = params.to_vec();
        let mut seen = AHashSet::new();
        let mut free = Vec::new();
        free_vars(&body_ir, &mut scope, &mut seen, &mut free);
        let captures = free
            .into_iter()
            .filter(|name| self.bound.iter().any(|bound| bound == name))
            .collect();

        IrExpr::Fn {
            params: params.to_vec(),
            body: Box::new(body_ir),
            captures,
        }
    }
}

/// Collects free variables of `node` in first-use order.
///
/// `bound` carries the names bound so far (parameters, then `Let` bindings
/// as they come into scope); nested functions contribute their own capture
/// lists rather than being re-walked.
fn free_vars(node: &IrNode, bound: &mut Vec<String>, seen: &mut AHashSet<String>, out: &mut Vec<String>) {
    match &node.expr {
        IrExpr::Const(_) => {}
        IrExpr::Var(name) => {
            if !bound.iter().any(|b| b == name) && seen.insert(name.clone()) {
                out.push(name.clone());
            }
        }
        IrExpr::If { cond, then, els } => {
            free_vars(cond, bound, seen, out);
            free_vars(then, bound, seen, out);
            free_vars(els, bound, seen, out);
        }
        IrExpr::Let { name, value, body } => {
            free_vars(value, bound, seen, out);
            bound.push(name.clone());
            free_vars(body, bound, seen, out);
            bound.pop();
        }
        IrExpr::Seq(items) => {
            for item in items {
                free_vars(item, bound, seen, out);
            }
        }
        IrExpr::Call { callee, args } => {
            free_vars(callee, bound, seen, out);
            for arg in args {
                free_vars(arg, bound, seen, out);
            }
        }
        IrExpr::Fn { captures, .. } => {
            for name in captures {
                if !bound.iter().any(|b| b == name) && seen.insert(name.clone()) {
                    out.push(name.clone());
                }
            }
        }
        IrExpr::Effect { args, .. } => {
            for arg in args {
                free_vars(arg, bound, seen, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parse::{ParseOptions, parse};

    use super::*;

    fn lower_source(source: &str) -> IrModule {
        let ast = parse(source, &ParseOptions::default()).unwrap();
        lower(&ast)
    }

    #[test]
    fn input_becomes_var() {
        let module = lower_source("$$");
        assert_eq!(module.body.expr, IrExpr::Var("input".to_owned()));
    }

    #[test]
    fn index_becomes_get_call() {
        let module = lower_source("$2");
        let IrExpr::Call { callee, args } = &module.body.expr else {
            panic!("expected call, got {:?}", module.body.expr);
        };
        assert_eq!(callee.expr, IrExpr::Var("get".to_owned()));
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].expr, IrExpr::Var("input".to_owned()));
        assert_eq!(args[1].expr, IrExpr::Const(Constant::Number(2.0)));
    }

    #[test]
    fn and_desugars_to_let_if() {
        let module = lower_source("(and a b)");
        let IrExpr::Let { name, body, .. } = &module.body.expr else {
            panic!("expected let, got {:?}", module.body.expr);
        };
        assert!(name.starts_with('\u{b7}'));
        let IrExpr::If { cond, then, els } = &body.expr else {
            panic!("expected if body");
        };
        assert_eq!(cond.expr, IrExpr::Var(name.clone()));
        assert_eq!(then.expr, IrExpr::Var("b".to_owned()));
        assert_eq!(els.expr, IrExpr::Var(name.clone()));
    }

    #[test]
    fn let_scopes_over_rest_of_sequence() {
        let module = lower_source("let: x 10\nlet: y 20\n(+ x y)");
        let IrExpr::Let { name, body, .. } = &module.body.expr else {
            panic!("expected outer let");
        };
        assert_eq!(name, "x");
        let IrExpr::Let { name, .. } = &body.expr else {
            panic!("expected inner let");
        };
        assert_eq!(name, "y");
    }

    #[test]
    fn captures_in_first_use_order() {
        let module = lower_source("let: a 1\nlet: b 2\n(fn (z) (+ b (+ a z)))");
        // walk to the Fn node
        fn find_fn(node: &IrNode) -> Option<&IrExpr> {
            match &node.expr {
                IrExpr::Fn { .. } => Some(&node.expr),
                IrExpr::Let { value, body, .. } => find_fn(value).or_else(|| find_fn(body)),
                IrExpr::Seq(items) => items.iter().find_map(find_fn),
                _ => None,
            }
        }
        let IrExpr::Fn { captures, .. } = find_fn(&module.body).unwrap() else {
            unreachable!()
        };
        assert_eq!(captures, &["b".to_owned(), "a".to_owned()]);
    }

    #[test]
    fn builtin_names_are_not_captured() {
        let module = lower_source("(fn (x) (+ x 1))");
        let IrExpr::Fn { captures, .. } = &module.body.expr else {
            panic!("expected fn, got {:?}", module.body.expr);
        };
        assert!(captures.is_empty(), "captures: {captures:?}");
    }

    #[test]
    fn nested_fn_captures_propagate() {
        // `a` is used only by the innermost function but must appear in the
        // outer function's capture list to be reachable at runtime.
        let module = lower_source("let: a 1\n(fn (x) (fn (y) (+ a (+ x y))))");
        let IrExpr::Let { body, .. } = &module.body.expr else {
            panic!("expected let");
        };
        let IrExpr::Fn { captures, body, .. } = &body.expr else {
            panic!("expected outer fn");
        };
        assert_eq!(captures, &["a".to_owned()]);
        let IrExpr::Fn { captures, .. } = &body.expr else {
            panic!("expected inner fn");
        };
        assert_eq!(captures, &["a".to_owned(), "x".to_owned()]);
    }

    #[test]
    fn assert_lowers_to_builtin_call() {
        let module = lower_source("assert: true");
        let IrExpr::Call { callee, .. } = &module.body.expr else {
            panic!("expected call, got {:?}", module.body.expr);
        };
        assert_eq!(callee.expr, IrExpr::Var("assert".to_owned()));
    }

    #[test]
    fn shell_mode_feeds_input() {
        let ast = parse("upper", &ParseOptions { shell_mode: true }).unwrap();
        assert!(matches!(&ast.expr, Expr::Call { .. }));
        let module = lower(&ast);
        let IrExpr::Call { args, .. } = &module.body.expr else {
            panic!("expected call");
        };
        assert_eq!(args[0].expr, IrExpr::Var("input".to_owned()));
    }
}
