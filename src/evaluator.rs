//! Continuation-passing evaluator.
//!
//! Every reduction step is a transition of an explicit trampoline, never a
//! recursive call into the host stack: evaluating a compound form suspends
//! into a [`Continuation`], and delivering a value runs the continuation's
//! pending step. Because the whole control state lives in ordinary values,
//! `call/cc` just wraps the current continuation in a [`Value::Continuation`]
//! and invoking one replaces the loop state; no host frames need unwinding.
//!
//! ## Proper tail calls
//!
//! A body sequence evaluates its last form directly under the enclosing
//! continuation instead of allocating a fresh frame for it. A closure applied
//! in tail position therefore reuses the caller's continuation, and an
//! arbitrarily long tail-recursive loop runs in constant continuation depth.
//!
//! ## Continuation structure
//!
//! A continuation carries the environment it resumes in, a residual body of
//! forms to evaluate in sequence, a parent continuation, and optionally a CPS
//! [`Step`] that processes the next value flowing through. The two
//! constructors are [`Continuation::null`] (terminal, returns to the caller)
//! and [`Continuation::make_cps`] (intermediate frame running a step).

use std::rc::Rc;

use crate::Error;
use crate::ast::{Closure, Value};
use crate::env::{self, Env, Namespace};

/// A reified control state: environment, residual body, parent continuation
/// and an optional CPS step.
#[derive(Clone)]
pub struct Continuation {
    pub(crate) env: Env,
    pub(crate) body: Vec<Value>,
    pub(crate) next: Option<Rc<Continuation>>,
    pub(crate) step: Option<Step>,
}

/// One defunctionalised CPS step: what to do with the value that arrives at a
/// continuation frame. Each variant carries exactly the data that step needs.
#[derive(Clone)]
pub(crate) enum Step {
    /// `if`: the test value arrived
    Branch { conseq: Value, alt: Option<Value> },
    /// `define` / `set!`: the value to bind arrived
    Bind {
        ns: Namespace,
        name: String,
        define: bool,
    },
    /// application: the operator value arrived, operands still unevaluated
    Operator { operands: Vec<Value> },
    /// application: collecting evaluated arguments left to right
    Operand {
        func: Value,
        pending: Vec<Value>,
        done: Vec<Value>,
    },
    /// `(apply f args)`: the function value arrived
    ApplyOperator { args_form: Value },
    /// `(apply f args)`: the argument list arrived
    ApplyTo { func: Value },
    /// the arrived value is itself a form to evaluate (macro expansion, `eval`)
    Expand,
    /// `call/cc`: the receiver arrived; hand it the current continuation
    ExecCallCc,
    /// `and` / `or` short-circuit chains
    And { rest: Vec<Value> },
    Or { rest: Vec<Value> },
    /// `let` / named `let`: collecting evaluated initialisers
    LetBind {
        name: String,
        pending: Vec<(String, Value)>,
        done: Vec<(String, Value)>,
        body: Vec<Value>,
        named: Option<String>,
    },
    /// `let*`: one fresh frame per binding, evaluated in sequence
    LetStarBind {
        name: String,
        pending: Vec<(String, Value)>,
        body: Vec<Value>,
    },
    /// `letrec`: initialisers evaluated under the pre-bound frame
    LetrecBind {
        name: String,
        pending: Vec<(String, Value)>,
        body: Vec<Value>,
    },
    /// `cond`: the current clause's test arrived
    CondTest { body: Vec<Value>, rest: Vec<Value> },
    /// quasiquote: assembling a template list element by element
    QuasiCons { pending: Vec<Value>, done: Vec<Value> },
}

/// Trampoline state. `Bounce` evaluates a form, `QuasiBounce` walks a
/// quasiquote template, `Run` delivers a value to a continuation, `Land`
/// leaves the loop.
pub(crate) enum Trampoline {
    Bounce(Value, Env, Continuation),
    QuasiBounce(Value, Env, Continuation),
    Run(Value, Continuation),
    Land(Value),
}

impl Continuation {
    /// The terminal continuation: delivers its value to the trampoline caller.
    pub fn null(env: Env) -> Continuation {
        Continuation {
            env,
            body: Vec::new(),
            next: None,
            step: None,
        }
    }

    /// An intermediate continuation frame that runs `step` when a value
    /// arrives, then continues with `parent`.
    pub(crate) fn make_cps(env: Env, parent: Continuation, step: Step) -> Continuation {
        Continuation {
            env,
            body: Vec::new(),
            next: Some(Rc::new(parent)),
            step: Some(step),
        }
    }

    fn parent(env: Env, next: Option<Rc<Continuation>>) -> Continuation {
        match next {
            Some(k) => (*k).clone(),
            None => Continuation::null(env),
        }
    }

    /// Process an arriving value: run the pending step if there is one,
    /// otherwise evaluate the residual body (sequence semantics: the arriving
    /// value is discarded unless it came from the last form), otherwise pass
    /// the value on.
    fn run(self, value: Value) -> Result<Trampoline, Error> {
        let Continuation {
            env,
            mut body,
            next,
            step,
        } = self;

        if let Some(step) = step {
            let parent = Continuation::parent(env.clone(), next);
            return run_step(step, env, parent, value);
        }

        if !body.is_empty() {
            let first = body.remove(0);
            return if body.is_empty() {
                Ok(Trampoline::Bounce(
                    first,
                    env.clone(),
                    Continuation::parent(env, next),
                ))
            } else {
                Ok(Trampoline::Bounce(
                    first,
                    env.clone(),
                    Continuation {
                        env,
                        body,
                        next,
                        step: None,
                    },
                ))
            };
        }

        match next {
            Some(k) => Ok(Trampoline::Run(value, (*k).clone())),
            None => Ok(Trampoline::Land(value)),
        }
    }
}

/// Evaluate a body sequence left to right under `k`. The final form is
/// bounced directly under `k` (the proper-tail-call rule: no fresh frame is
/// allocated for a tail position).
fn eval_sequence(env: Env, mut forms: Vec<Value>, k: Continuation) -> Result<Trampoline, Error> {
    if forms.is_empty() {
        return Ok(Trampoline::Run(Value::unspecified(), k));
    }
    let first = forms.remove(0);
    if forms.is_empty() {
        Ok(Trampoline::Bounce(first, env, k))
    } else {
        Ok(Trampoline::Bounce(
            first,
            env.clone(),
            Continuation {
                env,
                body: forms,
                next: Some(Rc::new(k)),
                step: None,
            },
        ))
    }
}

/// Parse a lambda parameter specification into fixed names and an optional
/// rest name: `(a b)`, `(a . r)`, or a bare symbol collecting everything.
fn parse_params(form: &Value) -> Result<(Vec<String>, Option<String>), Error> {
    fn names(items: &[Value]) -> Result<Vec<String>, Error> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Symbol(name) => {
                    if out.contains(name) {
                        return Err(Error::BadSpecialForm(
                            "Duplicate parameter name".into(),
                            item.clone(),
                        ));
                    }
                    out.push(name.clone());
                }
                other => {
                    return Err(Error::BadSpecialForm(
                        "Parameter names must be symbols".into(),
                        other.clone(),
                    ));
                }
            }
        }
        Ok(out)
    }

    match form {
        Value::Symbol(rest) => Ok((Vec::new(), Some(rest.clone()))),
        Value::List(items) => Ok((names(items)?, None)),
        Value::Pair(items, tail) => match &**tail {
            Value::Symbol(rest) => Ok((names(items)?, Some(rest.clone()))),
            other => Err(Error::BadSpecialForm(
                "Rest parameter must be a symbol".into(),
                other.clone(),
            )),
        },
        other => Err(Error::BadSpecialForm(
            "Malformed parameter list".into(),
            other.clone(),
        )),
    }
}

/// Parse a `let`-family binding list into (name, initialiser) pairs.
fn parse_bindings(form: &Value) -> Result<Vec<(String, Value)>, Error> {
    let Value::List(items) = form else {
        return Err(Error::BadSpecialForm(
            "Malformed binding list".into(),
            form.clone(),
        ));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::List(pair) if pair.len() == 2 => {
                if let Value::Symbol(name) = &pair[0] {
                    out.push((name.clone(), pair[1].clone()));
                } else {
                    return Err(Error::BadSpecialForm(
                        "Binding name must be a symbol".into(),
                        item.clone(),
                    ));
                }
            }
            other => {
                return Err(Error::BadSpecialForm(
                    "Malformed binding".into(),
                    other.clone(),
                ));
            }
        }
    }
    Ok(out)
}

fn make_closure(
    params_form: &Value,
    body: &[Value],
    env: &Env,
    tail: bool,
) -> Result<Value, Error> {
    let (params, rest) = parse_params(params_form)?;
    Ok(Value::Closure(Rc::new(Closure {
        params,
        rest,
        body: body.to_vec(),
        env: env.clone(),
        tail,
    })))
}

/// Evaluate one form. Symbols and self-evaluating values deliver directly;
/// lists dispatch to special forms, macro uses, or application.
fn bounce(value: Value, env: Env, k: Continuation) -> Result<Trampoline, Error> {
    match value {
        Value::Symbol(name) => {
            let delivered = env.lookup(&name)?;
            Ok(Trampoline::Run(delivered, k))
        }
        Value::List(elements) => {
            if elements.is_empty() {
                return Err(Error::BadSpecialForm(
                    "Cannot evaluate the empty list".into(),
                    Value::List(elements),
                ));
            }
            dispatch_list(elements, env, k)
        }
        Value::Pair(head, tail) => Err(Error::BadSpecialForm(
            "Cannot evaluate an improper list".into(),
            Value::Pair(head, tail),
        )),
        // Numbers, strings, chars, booleans, vectors, procedures, the
        // unspecified value: self-evaluating.
        other => Ok(Trampoline::Run(other, k)),
    }
}

fn dispatch_list(elements: Vec<Value>, env: Env, k: Continuation) -> Result<Trampoline, Error> {
    let head = elements[0].clone();
    let rest = elements[1..].to_vec();

    if let Value::Symbol(name) = &head {
        match name.as_str() {
            "quote" => {
                return match rest.as_slice() {
                    [literal] => Ok(Trampoline::Run(literal.clone(), k)),
                    _ => Err(bad_form("quote takes one argument", &elements)),
                };
            }
            "quasiquote" => {
                return match rest.into_iter().next() {
                    Some(template) => Ok(Trampoline::QuasiBounce(template, env, k)),
                    None => Err(bad_form("quasiquote takes one argument", &elements)),
                };
            }
            "if" => {
                return match rest.len() {
                    2 | 3 => {
                        let mut forms = rest.into_iter();
                        let test = forms.next().unwrap_or_else(Value::unspecified);
                        let conseq = forms.next().unwrap_or_else(Value::unspecified);
                        let alt = forms.next();
                        Ok(Trampoline::Bounce(
                            test,
                            env.clone(),
                            Continuation::make_cps(env, k, Step::Branch { conseq, alt }),
                        ))
                    }
                    _ => Err(bad_form("if takes a test, a consequent and an optional alternate", &elements)),
                };
            }
            "set!" => {
                return match rest.as_slice() {
                    [Value::Symbol(target), form] => Ok(Trampoline::Bounce(
                        form.clone(),
                        env.clone(),
                        Continuation::make_cps(
                            env,
                            k,
                            Step::Bind {
                                ns: Namespace::Var,
                                name: target.clone(),
                                define: false,
                            },
                        ),
                    )),
                    _ => Err(bad_form("set! takes a symbol and a value", &elements)),
                };
            }
            "define" => return eval_define(rest, elements, env, k),
            "define-macro" => {
                return match rest.split_first() {
                    Some((Value::List(sig), body)) if !sig.is_empty() => {
                        if let Value::Symbol(macro_name) = &sig[0] {
                            let params_form = Value::List(sig[1..].to_vec());
                            // Transformers are not tail-evaluating: the
                            // expansion step installed at the use site must
                            // run after the transformer body.
                            let transformer = make_closure(&params_form, body, &env, false)?;
                            let stored = env.define(Namespace::Macro, macro_name, transformer);
                            Ok(Trampoline::Run(stored, k))
                        } else {
                            Err(bad_form("define-macro needs a macro name", &elements))
                        }
                    }
                    _ => Err(bad_form("define-macro takes a signature and a body", &elements)),
                };
            }
            "lambda" => {
                return match rest.split_first() {
                    Some((params_form, body)) => {
                        let closure = make_closure(params_form, body, &env, true)?;
                        Ok(Trampoline::Run(closure, k))
                    }
                    None => Err(bad_form("lambda takes a parameter list and a body", &elements)),
                };
            }
            "begin" => return eval_sequence(env, rest, k),
            "let" => return eval_let(rest, elements, env, k),
            "let*" => return eval_let_star(rest, elements, env, k),
            "letrec" => return eval_letrec(rest, elements, env, k),
            "cond" => return eval_cond_clauses(rest, env, k),
            "and" => {
                return match rest.split_first() {
                    None => Ok(Trampoline::Run(Value::Bool(true), k)),
                    Some((first, more)) => Ok(Trampoline::Bounce(
                        first.clone(),
                        env.clone(),
                        Continuation::make_cps(env, k, Step::And { rest: more.to_vec() }),
                    )),
                };
            }
            "or" => {
                return match rest.split_first() {
                    None => Ok(Trampoline::Run(Value::Bool(false), k)),
                    Some((first, more)) => Ok(Trampoline::Bounce(
                        first.clone(),
                        env.clone(),
                        Continuation::make_cps(env, k, Step::Or { rest: more.to_vec() }),
                    )),
                };
            }
            "apply" => {
                return match rest.as_slice() {
                    [func_form, args_form] => Ok(Trampoline::Bounce(
                        func_form.clone(),
                        env.clone(),
                        Continuation::make_cps(
                            env,
                            k,
                            Step::ApplyOperator {
                                args_form: args_form.clone(),
                            },
                        ),
                    )),
                    _ => Err(bad_form("apply takes a function and an argument list", &elements)),
                };
            }
            "eval" => {
                return match rest.as_slice() {
                    [form] => Ok(Trampoline::Bounce(
                        form.clone(),
                        env.clone(),
                        Continuation::make_cps(env, k, Step::Expand),
                    )),
                    _ => Err(bad_form("eval takes one expression", &elements)),
                };
            }
            "call/cc" | "call-with-current-continuation" => {
                return match rest.as_slice() {
                    [receiver] => Ok(Trampoline::Bounce(
                        receiver.clone(),
                        env.clone(),
                        Continuation::make_cps(env, k, Step::ExecCallCc),
                    )),
                    _ => Err(bad_form("call/cc takes one receiver", &elements)),
                };
            }
            _ if env.is_rec_bound(Namespace::Macro, name) => {
                // Macro use: apply the transformer to the unevaluated operand
                // forms, then evaluate whatever it expanded to.
                let transformer = env.get(Namespace::Macro, name)?;
                let expand = Continuation::make_cps(env.clone(), k, Step::Expand);
                return apply_value(transformer, rest, expand);
            }
            _ => {}
        }
    }

    // Ordinary application: evaluate the operator, then the operands.
    Ok(Trampoline::Bounce(
        head,
        env.clone(),
        Continuation::make_cps(env, k, Step::Operator { operands: rest }),
    ))
}

fn bad_form(message: &str, elements: &[Value]) -> Error {
    Error::BadSpecialForm(message.into(), Value::List(elements.to_vec()))
}

fn eval_define(
    rest: Vec<Value>,
    elements: Vec<Value>,
    env: Env,
    k: Continuation,
) -> Result<Trampoline, Error> {
    match rest.split_first() {
        // (define name value)
        Some((Value::Symbol(name), [form])) => Ok(Trampoline::Bounce(
            form.clone(),
            env.clone(),
            Continuation::make_cps(
                env,
                k,
                Step::Bind {
                    ns: Namespace::Var,
                    name: name.clone(),
                    define: true,
                },
            ),
        )),
        // (define (name params...) body...) and the dotted variants
        Some((Value::List(sig), body)) if !sig.is_empty() => {
            if let Value::Symbol(name) = &sig[0] {
                let params_form = Value::List(sig[1..].to_vec());
                let closure = make_closure(&params_form, body, &env, true)?;
                let stored = env.define(Namespace::Var, name, closure);
                Ok(Trampoline::Run(stored, k))
            } else {
                Err(bad_form("define needs a name", &elements))
            }
        }
        Some((Value::Pair(sig, rest_param), body)) if !sig.is_empty() => {
            if let Value::Symbol(name) = &sig[0] {
                let params_form = Value::pair(sig[1..].to_vec(), (**rest_param).clone());
                let closure = make_closure(&params_form, body, &env, true)?;
                let stored = env.define(Namespace::Var, name, closure);
                Ok(Trampoline::Run(stored, k))
            } else {
                Err(bad_form("define needs a name", &elements))
            }
        }
        _ => Err(bad_form("Malformed define", &elements)),
    }
}

fn eval_let(
    rest: Vec<Value>,
    elements: Vec<Value>,
    env: Env,
    k: Continuation,
) -> Result<Trampoline, Error> {
    // (let name bindings body...) | (let bindings body...)
    let (named, bindings_form, body) = match rest.split_first() {
        Some((Value::Symbol(name), [bindings_form, body @ ..])) => {
            (Some(name.clone()), bindings_form, body)
        }
        Some((bindings_form, body)) => (None, bindings_form, body),
        None => return Err(bad_form("Malformed let", &elements)),
    };
    let mut bindings = parse_bindings(bindings_form)?;
    let body = body.to_vec();

    if bindings.is_empty() {
        return finish_let(Vec::new(), body, named, env, k);
    }
    let (name, init) = bindings.remove(0);
    Ok(Trampoline::Bounce(
        init,
        env.clone(),
        Continuation::make_cps(
            env,
            k,
            Step::LetBind {
                name,
                pending: bindings,
                done: Vec::new(),
                body,
                named,
            },
        ),
    ))
}

/// All initialisers are evaluated; build the frame and run the body. A named
/// let binds a closure over a fresh frame and applies it, giving the loop
/// variable proper tail calls.
fn finish_let(
    done: Vec<(String, Value)>,
    body: Vec<Value>,
    named: Option<String>,
    env: Env,
    k: Continuation,
) -> Result<Trampoline, Error> {
    match named {
        None => {
            let call_env = env.extend_vars(done);
            eval_sequence(call_env, body, k)
        }
        Some(loop_name) => {
            let loop_env = env.extend_vars(Vec::new());
            let (names, args): (Vec<String>, Vec<Value>) = done.into_iter().unzip();
            let closure = Value::Closure(Rc::new(Closure {
                params: names,
                rest: None,
                body,
                env: loop_env.clone(),
                tail: true,
            }));
            loop_env.define(Namespace::Var, &loop_name, closure.clone());
            apply_value(closure, args, k)
        }
    }
}

fn eval_let_star(
    rest: Vec<Value>,
    elements: Vec<Value>,
    env: Env,
    k: Continuation,
) -> Result<Trampoline, Error> {
    let Some((bindings_form, body)) = rest.split_first() else {
        return Err(bad_form("Malformed let*", &elements));
    };
    let mut bindings = parse_bindings(bindings_form)?;
    let body = body.to_vec();

    if bindings.is_empty() {
        return eval_sequence(env.extend_vars(Vec::new()), body, k);
    }
    let (name, init) = bindings.remove(0);
    Ok(Trampoline::Bounce(
        init,
        env.clone(),
        Continuation::make_cps(
            env,
            k,
            Step::LetStarBind {
                name,
                pending: bindings,
                body,
            },
        ),
    ))
}

fn eval_letrec(
    rest: Vec<Value>,
    elements: Vec<Value>,
    env: Env,
    k: Continuation,
) -> Result<Trampoline, Error> {
    let Some((bindings_form, body)) = rest.split_first() else {
        return Err(bad_form("Malformed letrec", &elements));
    };
    let mut bindings = parse_bindings(bindings_form)?;
    let body = body.to_vec();

    // Pre-bind every name so the initialisers can refer to each other.
    let rec_env = env.extend_vars(
        bindings
            .iter()
            .map(|(name, _)| (name.clone(), Value::unspecified())),
    );

    if bindings.is_empty() {
        return eval_sequence(rec_env, body, k);
    }
    let (name, init) = bindings.remove(0);
    Ok(Trampoline::Bounce(
        init,
        rec_env.clone(),
        Continuation::make_cps(
            rec_env,
            k,
            Step::LetrecBind {
                name,
                pending: bindings,
                body,
            },
        ),
    ))
}

/// Dispatch the next cond clause: `(test body...)` or `(else body...)`.
fn eval_cond_clauses(
    mut clauses: Vec<Value>,
    env: Env,
    k: Continuation,
) -> Result<Trampoline, Error> {
    if clauses.is_empty() {
        return Ok(Trampoline::Run(Value::unspecified(), k));
    }
    let clause = clauses.remove(0);
    let Value::List(items) = &clause else {
        return Err(Error::BadSpecialForm("Malformed cond clause".into(), clause));
    };
    let Some((test, body)) = items.split_first() else {
        return Err(Error::BadSpecialForm("Malformed cond clause".into(), clause));
    };

    if matches!(test, Value::Symbol(s) if s == "else") {
        return eval_sequence(env, body.to_vec(), k);
    }
    Ok(Trampoline::Bounce(
        test.clone(),
        env.clone(),
        Continuation::make_cps(
            env,
            k,
            Step::CondTest {
                body: body.to_vec(),
                rest: clauses,
            },
        ),
    ))
}

/// Walk one quasiquote template element: `(unquote x)` switches back to
/// ordinary evaluation, nested lists recurse, everything else passes through.
fn quasi_bounce(value: Value, env: Env, k: Continuation) -> Result<Trampoline, Error> {
    match value {
        Value::List(items) if !items.is_empty() => {
            if matches!(&items[0], Value::Symbol(s) if s == "unquote") {
                return match items.as_slice() {
                    [_, expr] => Ok(Trampoline::Bounce(expr.clone(), env, k)),
                    _ => Err(Error::BadSpecialForm(
                        "unquote takes one expression".into(),
                        Value::List(items),
                    )),
                };
            }
            if matches!(&items[0], Value::Symbol(s) if s == "unquote-splicing") {
                return Err(Error::NotImplemented("unquote-splicing".into()));
            }
            let mut items = items;
            let first = items.remove(0);
            Ok(Trampoline::QuasiBounce(
                first,
                env.clone(),
                Continuation::make_cps(
                    env,
                    k,
                    Step::QuasiCons {
                        pending: items,
                        done: Vec::new(),
                    },
                ),
            ))
        }
        other => Ok(Trampoline::Run(other, k)),
    }
}

/// Run one CPS step with the value that arrived at its continuation frame.
fn run_step(step: Step, env: Env, parent: Continuation, value: Value) -> Result<Trampoline, Error> {
    match step {
        Step::Branch { conseq, alt } => {
            if value.is_truthy() {
                Ok(Trampoline::Bounce(conseq, env, parent))
            } else {
                match alt {
                    Some(alt) => Ok(Trampoline::Bounce(alt, env, parent)),
                    None => Ok(Trampoline::Run(Value::unspecified(), parent)),
                }
            }
        }
        Step::Bind { ns, name, define } => {
            let stored = if define {
                env.define(ns, &name, value)
            } else {
                env.set(ns, &name, value)?
            };
            Ok(Trampoline::Run(stored, parent))
        }
        Step::Operator { mut operands } => {
            if operands.is_empty() {
                return apply_value(value, Vec::new(), parent);
            }
            let first = operands.remove(0);
            Ok(Trampoline::Bounce(
                first,
                env.clone(),
                Continuation::make_cps(
                    env,
                    parent,
                    Step::Operand {
                        func: value,
                        pending: operands,
                        done: Vec::new(),
                    },
                ),
            ))
        }
        Step::Operand {
            func,
            mut pending,
            mut done,
        } => {
            done.push(value);
            if pending.is_empty() {
                return apply_value(func, done, parent);
            }
            let next = pending.remove(0);
            Ok(Trampoline::Bounce(
                next,
                env.clone(),
                Continuation::make_cps(env, parent, Step::Operand { func, pending, done }),
            ))
        }
        Step::ApplyOperator { args_form } => Ok(Trampoline::Bounce(
            args_form,
            env.clone(),
            Continuation::make_cps(env, parent, Step::ApplyTo { func: value }),
        )),
        Step::ApplyTo { func } => match env::deref_deep(&value)? {
            Value::List(args) => apply_value(func, args, parent),
            other => Err(Error::type_mismatch("argument list", &other)),
        },
        Step::Expand => Ok(Trampoline::Bounce(value, env, parent)),
        Step::ExecCallCc => {
            let current = Value::Continuation(Rc::new(parent.clone()));
            apply_value(value, vec![current], parent)
        }
        Step::And { mut rest } => {
            if !value.is_truthy() || rest.is_empty() {
                return Ok(Trampoline::Run(value, parent));
            }
            let first = rest.remove(0);
            Ok(Trampoline::Bounce(
                first,
                env.clone(),
                Continuation::make_cps(env, parent, Step::And { rest }),
            ))
        }
        Step::Or { mut rest } => {
            if value.is_truthy() || rest.is_empty() {
                return Ok(Trampoline::Run(value, parent));
            }
            let first = rest.remove(0);
            Ok(Trampoline::Bounce(
                first,
                env.clone(),
                Continuation::make_cps(env, parent, Step::Or { rest }),
            ))
        }
        Step::LetBind {
            name,
            mut pending,
            mut done,
            body,
            named,
        } => {
            done.push((name, value));
            if pending.is_empty() {
                return finish_let(done, body, named, env, parent);
            }
            let (next_name, init) = pending.remove(0);
            Ok(Trampoline::Bounce(
                init,
                env.clone(),
                Continuation::make_cps(
                    env,
                    parent,
                    Step::LetBind {
                        name: next_name,
                        pending,
                        done,
                        body,
                        named,
                    },
                ),
            ))
        }
        Step::LetStarBind {
            name,
            mut pending,
            body,
        } => {
            let child = env.extend_vars([(name, value)]);
            if pending.is_empty() {
                return eval_sequence(child, body, parent);
            }
            let (next_name, init) = pending.remove(0);
            Ok(Trampoline::Bounce(
                init,
                child.clone(),
                Continuation::make_cps(
                    child,
                    parent,
                    Step::LetStarBind {
                        name: next_name,
                        pending,
                        body,
                    },
                ),
            ))
        }
        Step::LetrecBind {
            name,
            mut pending,
            body,
        } => {
            env.set(Namespace::Var, &name, value)?;
            if pending.is_empty() {
                return eval_sequence(env, body, parent);
            }
            let (next_name, init) = pending.remove(0);
            Ok(Trampoline::Bounce(
                init,
                env.clone(),
                Continuation::make_cps(
                    env,
                    parent,
                    Step::LetrecBind {
                        name: next_name,
                        pending,
                        body,
                    },
                ),
            ))
        }
        Step::CondTest { body, rest } => {
            if value.is_truthy() {
                if body.is_empty() {
                    // (cond (test)) delivers the test value itself
                    Ok(Trampoline::Run(value, parent))
                } else {
                    eval_sequence(env, body, parent)
                }
            } else {
                eval_cond_clauses(rest, env, parent)
            }
        }
        Step::QuasiCons {
            mut pending,
            mut done,
        } => {
            done.push(value);
            if pending.is_empty() {
                return Ok(Trampoline::Run(Value::List(done), parent));
            }
            let next = pending.remove(0);
            Ok(Trampoline::QuasiBounce(
                next,
                env.clone(),
                Continuation::make_cps(env, parent, Step::QuasiCons { pending, done }),
            ))
        }
    }
}

/// Apply an already-evaluated operator to already-evaluated arguments.
///
/// Primitives run synchronously and deliver to `k`. Closures check arity,
/// extend their captured environment and tail-evaluate their body under the
/// caller's continuation. Applying a reified continuation discards the
/// current continuation and resumes the captured chain.
pub(crate) fn apply_value(
    func: Value,
    args: Vec<Value>,
    k: Continuation,
) -> Result<Trampoline, Error> {
    let func = env::deref(&func)?;
    match func {
        Value::PrimFn { func, .. } | Value::IoFn { func, .. } => {
            Ok(Trampoline::Run(func(&args)?, k))
        }
        Value::Closure(closure) => {
            let expected = closure.params.len();
            let matches_arity = if closure.rest.is_some() {
                args.len() >= expected
            } else {
                args.len() == expected
            };
            if !matches_arity {
                return Err(Error::num_args(expected, args.len()));
            }

            let mut entries: Vec<(String, Value)> = closure
                .params
                .iter()
                .cloned()
                .zip(args.iter().cloned())
                .collect();
            if let Some(rest_name) = &closure.rest {
                entries.push((rest_name.clone(), Value::List(args[expected..].to_vec())));
            }
            let call_env = closure.env.extend_vars(entries);

            let cont = if closure.tail {
                k
            } else {
                Continuation {
                    env: call_env.clone(),
                    body: Vec::new(),
                    next: Some(Rc::new(k)),
                    step: None,
                }
            };
            eval_sequence(call_env, closure.body.clone(), cont)
        }
        Value::Continuation(captured) => {
            let value = args.into_iter().next().unwrap_or_else(Value::unspecified);
            Ok(Trampoline::Run(value, (*captured).clone()))
        }
        other => Err(Error::NotFunction(
            "Attempt to apply non-function".into(),
            other.to_string(),
        )),
    }
}

fn run_trampoline(mut state: Trampoline) -> Result<Value, Error> {
    loop {
        state = match state {
            Trampoline::Bounce(value, env, k) => bounce(value, env, k)?,
            Trampoline::QuasiBounce(value, env, k) => quasi_bounce(value, env, k)?,
            Trampoline::Run(value, k) => k.run(value)?,
            Trampoline::Land(value) => return Ok(value),
        };
    }
}

/// Evaluate a form in `env` under a null top-level continuation.
///
/// Re-entrant: primitives may call back into `eval`; a continuation captured
/// in one call may be invoked in a later one and resumes its own chain.
pub fn eval(env: &Env, form: &Value) -> Result<Value, Error> {
    run_trampoline(Trampoline::Bounce(
        form.clone(),
        env.clone(),
        Continuation::null(env.clone()),
    ))
}

/// Apply an operator value to evaluated arguments under a null continuation.
pub fn apply(env: &Env, func: &Value, args: &[Value]) -> Result<Value, Error> {
    let k = Continuation::null(env.clone());
    run_trampoline(apply_value(func.clone(), args.to_vec(), k)?)
}


#[cfg(all(test, feature = "scheme"))]
#[expect(clippy::unwrap_used)] // test code OK
mod eval_tests {
    use super::*;
    use crate::builtinops::create_global_env;
    use crate::scheme::parse_program;

    /// Expected outcome of evaluating a program (all forms in sequence, last
    /// value kept).
    enum EvalResult {
        /// Printed form of the (deeply dereferenced) result
        Shows(&'static str),
        /// Evaluation fails and the error display contains this text
        ErrorContains(&'static str),
    }
    use EvalResult::*;

    fn eval_all(env: &Env, source: &str) -> Result<Value, Error> {
        let mut last = Value::unspecified();
        for form in parse_program(source)? {
            last = eval(env, &form)?;
        }
        Ok(last)
    }

    fn run_eval_tests(test_cases: Vec<(&str, EvalResult)>) {
        for (i, (source, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            let result = eval_all(&env, source);
            match (result, expected) {
                (Ok(value), Shows(text)) => {
                    let concrete = env::deref_deep(&value).unwrap();
                    assert_eq!(
                        &format!("{concrete}"),
                        text,
                        "Eval test #{}: value mismatch for {source}",
                        i + 1
                    );
                }
                (Err(err), ErrorContains(text)) => {
                    let msg = format!("{err}");
                    assert!(
                        msg.contains(text),
                        "Eval test #{}: error {msg:?} should contain {text:?}",
                        i + 1
                    );
                }
                (Ok(value), ErrorContains(text)) => {
                    panic!(
                        "Eval test #{}: expected error containing {text:?}, got {value:?}",
                        i + 1
                    );
                }
                (Err(err), Shows(text)) => {
                    panic!(
                        "Eval test #{}: expected {text:?}, got error {err}",
                        i + 1
                    );
                }
            }
        }
    }

    #[test]
    fn test_basic_forms() {
        run_eval_tests(vec![
            ("42", Shows("42")),
            ("\"abc\"", Shows("\"abc\"")),
            ("#t", Shows("#t")),
            ("'foo", Shows("foo")),
            ("'(1 2 3)", Shows("(1 2 3)")),
            ("(quote (a . b))", Shows("(a . b)")),
            ("(+ 1 2 3)", Shows("6")),
            ("(- 10 1 2)", Shows("7")),
            ("(* 2 3 4)", Shows("24")),
            ("(/ 2 4)", Shows("1/2")),
            ("(begin 1 2 3)", Shows("3")),
            ("(if #t 'yes 'no)", Shows("yes")),
            ("(if #f 'yes 'no)", Shows("no")),
            // only #f is falsy
            ("(if 0 'yes 'no)", Shows("yes")),
            ("(if '() 'yes 'no)", Shows("yes")),
            ("(if \"\" 'yes 'no)", Shows("yes")),
        ]);
    }

    #[test]
    fn test_define_set_and_scope() {
        run_eval_tests(vec![
            ("(define x 10) x", Shows("10")),
            ("(define x 10) (set! x 20) x", Shows("20")),
            ("(define x 10) (define x 11) x", Shows("11")),
            ("(set! nowhere 1)", ErrorContains("Setting an unbound variable")),
            // set! delivers the new value
            ("(define x 1) (set! x 5)", Shows("5")),
            // closures capture their defining environment
            (
                "(define (adder n) (lambda (x) (+ x n))) ((adder 3) 4)",
                Shows("7"),
            ),
            // set! from inside a closure reaches the defining frame
            (
                "(define counter 0)
                 (define (bump) (set! counter (+ counter 1)))
                 (bump) (bump) counter",
                Shows("2"),
            ),
        ]);
    }

    #[test]
    fn test_lambda_shapes_and_arity() {
        run_eval_tests(vec![
            ("((lambda (a b) (+ a b)) 1 2)", Shows("3")),
            ("((lambda (a . b) b) 1 2 3)", Shows("(2 3)")),
            ("((lambda args args) 1 2)", Shows("(1 2)")),
            ("((lambda (a . b) b) 1)", Shows("()")),
            ("((lambda (a b) a) 1)", ErrorContains("Expected 2 args; found 1")),
            ("((lambda (a . b) b))", ErrorContains("Expected 1 args; found 0")),
            ("(define (f . xs) xs) (f 1 2)", Shows("(1 2)")),
            ("(1 2 3)", ErrorContains("Attempt to apply non-function")),
            ("(lambda (a a) a)", ErrorContains("Duplicate parameter name")),
        ]);
    }

    #[test]
    fn test_let_family() {
        run_eval_tests(vec![
            ("(let ((a 1) (b 2)) (+ a b))", Shows("3")),
            // let initialisers see the outer scope, not each other
            ("(define a 10) (let ((a 1) (b a)) b)", Shows("10")),
            ("(let* ((a 1) (b (+ a 1))) b)", Shows("2")),
            (
                "(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1)))))
                          (odd?  (lambda (n) (if (= n 0) #f (even? (- n 1))))))
                   (even? 10))",
                Shows("#t"),
            ),
            ("(let loop ((n 3) (acc 1)) (if (= n 0) acc (loop (- n 1) (* acc n))))", Shows("6")),
            ("(let ((x 1)) )", Shows("")),
            ("(let 5 x)", ErrorContains("Malformed binding list")),
        ]);
    }

    #[test]
    fn test_cond_and_or() {
        run_eval_tests(vec![
            ("(cond (#f 1) (#t 2) (else 3))", Shows("2")),
            ("(cond (#f 1) (else 3))", Shows("3")),
            ("(cond (#f 1))", Shows("")),
            ("(cond (42))", Shows("42")),
            ("(and)", Shows("#t")),
            ("(and 1 2 3)", Shows("3")),
            ("(and 1 #f 3)", Shows("#f")),
            ("(or)", Shows("#f")),
            ("(or #f 2)", Shows("2")),
            ("(or #f #f)", Shows("#f")),
            // short-circuit: the unbound variable is never evaluated
            ("(and #f unbound)", Shows("#f")),
            ("(or 1 unbound)", Shows("1")),
        ]);
    }

    #[test]
    fn test_quasiquote() {
        run_eval_tests(vec![
            ("`(1 2 3)", Shows("(1 2 3)")),
            ("(define x 5) `(a ,x b)", Shows("(a 5 b)")),
            ("(define x 5) `(a (b ,(+ x 1)))", Shows("(a (b 6))")),
            ("`x", Shows("x")),
            ("(define x 5) `,x", Shows("5")),
        ]);
    }

    #[test]
    fn test_apply_and_eval_forms() {
        run_eval_tests(vec![
            ("(apply + '(1 2 3))", Shows("6")),
            ("(apply (lambda (a b) (* a b)) '(3 4))", Shows("12")),
            ("(eval '(+ 1 2))", Shows("3")),
            ("(define form '(* 2 21)) (eval form)", Shows("42")),
            ("(apply + 5)", ErrorContains("Invalid type")),
        ]);
    }

    #[test]
    fn test_recursion() {
        run_eval_tests(vec![
            (
                "(define f (lambda (n) (if (= n 0) 0 (+ n (f (- n 1)))))) (f 5)",
                Shows("15"),
            ),
            (
                "(define (fib n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))) (fib 10)",
                Shows("55"),
            ),
        ]);
    }

    #[test]
    fn test_proper_tail_calls_run_long_loops() {
        run_eval_tests(vec![
            (
                "(let loop ((n 100000) (a 0)) (if (= n 0) a (loop (- n 1) (+ a 1))))",
                Shows("100000"),
            ),
            (
                "(define (count n acc) (if (= n 0) acc (count (- n 1) (+ acc 1))))
                 (count 100000 0)",
                Shows("100000"),
            ),
        ]);
    }

    #[test]
    fn test_argument_order_is_left_to_right() {
        run_eval_tests(vec![(
            "(define log '())
             ((lambda (a b) (list a b))
              (begin (set! log (cons 1 log)) 'x)
              (begin (set! log (cons 2 log)) 'y))
             log",
            Shows("(2 1)"),
        )]);
    }

    #[test]
    fn test_call_cc() {
        run_eval_tests(vec![
            // immediate invocation is the identity
            ("(call/cc (lambda (k) (k 42)))", Shows("42")),
            ("(call-with-current-continuation (lambda (k) (k 42)))", Shows("42")),
            // a continuation ignores the rest of the receiver body
            ("(call/cc (lambda (k) (+ 1 (k 10))))", Shows("10")),
            // falling off the receiver returns its value
            ("(call/cc (lambda (k) 7))", Shows("7")),
            // escape from the middle of an argument list
            ("(+ 1 (call/cc (lambda (k) (k 10) 99)))", Shows("11")),
        ]);
    }

    #[test]
    fn test_continuation_reinvocation_across_eval_calls() {
        let env = create_global_env();
        eval_all(&env, "(define k #f)").unwrap();
        let first = eval_all(&env, "(+ 1 (call/cc (lambda (c) (set! k c) 10)))").unwrap();
        assert_eq!(format!("{first}"), "11");
        // resuming the captured continuation re-runs the pending addition
        let second = eval_all(&env, "(k 100)").unwrap();
        assert_eq!(format!("{second}"), "101");
        // and it stays invocable
        let third = eval_all(&env, "(k 1000)").unwrap();
        assert_eq!(format!("{third}"), "1001");
    }

    #[test]
    fn test_define_macro() {
        run_eval_tests(vec![
            (
                "(define-macro (swap-args f a b) (list f b a))
                 (swap-args - 1 10)",
                Shows("9"),
            ),
            (
                "(define-macro (unless test then else) (list 'if test else then))
                 (unless #f 'a 'b)",
                Shows("a"),
            ),
            // the transformer runs on unevaluated forms
            (
                "(define-macro (second-form a b) b)
                 (second-form unbound-and-unused 42)",
                Shows("42"),
            ),
        ]);
    }

    #[test]
    fn test_special_form_misuse() {
        run_eval_tests(vec![
            ("(quote)", ErrorContains("quote takes one argument")),
            ("(if #t)", ErrorContains("if takes a test")),
            ("(set! 5 1)", ErrorContains("set! takes a symbol")),
            ("(define)", ErrorContains("Malformed define")),
            ("()", ErrorContains("Cannot evaluate the empty list")),
            ("(lambda)", ErrorContains("lambda takes a parameter list")),
        ]);
    }

    #[test]
    fn test_macro_namespace_is_separate() {
        let env = create_global_env();
        eval_all(
            &env,
            "(define-macro (twice f) (list 'begin (list f) (list f)))",
        )
        .unwrap();
        // a variable with the same name does not shadow the macro use,
        // and the macro does not shadow the variable
        eval_all(&env, "(define twice 5)").unwrap();
        assert_eq!(format!("{}", eval_all(&env, "twice").unwrap()), "5");
        let result = eval_all(
            &env,
            "(define n 0) (twice (lambda () (set! n (+ n 1)))) n",
        )
        .unwrap();
        assert_eq!(format!("{result}"), "2");
    }
}
