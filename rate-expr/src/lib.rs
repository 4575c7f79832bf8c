//! # RATE-EXPR
//!
//! Compiled arithmetic expressions for ion-channel rate laws.
//!
//! Voltage- and concentration-dependent gating models are usually written as
//! short formulas over a handful of named scalars, e.g. the classic delayed
//! rectifier activation rate
//!
//! ```text
//! 0.01*(10 - (v*1000+70))/(exp((10 - (v*1000+70))/10) - 1)*1000
//! ```
//!
//! A [`CompiledExpr`] parses such a string once, resolves every variable to a
//! slot index at compile time, and then evaluates against a caller-owned slot
//! buffer with no reparsing and no per-call allocation. This matters because
//! a formula-backed gate is evaluated once per table entry on every refill,
//! and a two-dimensional gate is evaluated on every simulation step.
//!
//! ## Language
//!
//! - Numbers in decimal or scientific notation, `+ - * / % ^`, unary `-`/`!`.
//! - Comparisons (`< <= > >= == !=`) and logical `&&`/`||`, producing 1 or 0.
//! - Conditionals: `cond ? a : b`.
//! - Assignment to a declared variable: `alpha := 0.1*v`. The written slot is
//!   visible to the rest of the expression and to the caller afterwards.
//! - Multi-statement groups: `~(e1, e2, e3)` evaluates every item in order
//!   and yields the last. The leading `~` is optional.
//! - Builtin functions: `ln` (alias `log`), `log10`, `exp`, `sqrt`, `abs`,
//!   `sin`, `cos`, `tan`, `fmod(x,y)`, `pow(x,y)`, `min(x,y)`, `max(x,y)`,
//!   `rand()` uniform in [0,1), `srand(seed)` seeded uniform in [0,1),
//!   `rand2(lo,hi)` uniform in [lo,hi). Constants `pi` and `e`.
//!
//! Combining assignment and conditionals lets a model clamp or splice rate
//! laws without leaving the expression language:
//!
//! ```
//! use rate_expr::CompiledExpr;
//!
//! let expr = CompiledExpr::compile(
//!     "~(alpha := 76.4*exp(0.037*v), alpha < 3.8 ? 3.8 : alpha)",
//!     &["v", "alpha"],
//! ).unwrap();
//!
//! let mut slots = [0.0, 0.0];
//! slots[0] = -120.0;
//! let clamped = expr.eval(&mut slots);
//! assert_eq!(clamped, 3.8);
//! ```
//!
//! ## Errors
//!
//! Compilation never silently accepts malformed input: syntax errors, unknown
//! variables, unknown functions and wrong argument counts are all reported as
//! a structured [`ExprError`] carrying the byte position and a diagnostic.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Errors produced while compiling an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The input does not parse as an expression.
    #[error("Parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    /// An identifier is neither a declared variable nor a constant.
    #[error("Unknown variable `{name}` at byte {position}")]
    UnknownVariable { name: String, position: usize },

    /// A call names a function that does not exist.
    #[error("Unknown function `{name}` at byte {position}")]
    UnknownFunction { name: String, position: usize },

    /// A call has the wrong number of arguments.
    #[error("Function `{name}` expects {expected} argument(s), got {got} at byte {position}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
        position: usize,
    },
}

/// Result type for expression compilation.
pub type Result<T> = std::result::Result<T, ExprError>;

#[derive(Parser)]
#[grammar_inline = r#"
WHITESPACE = _{ " " | "\t" | "\r" | "\n" }

number = @{
    ASCII_DIGIT+ ~ ("." ~ ASCII_DIGIT*)? ~ (("e" | "E") ~ ("+" | "-")? ~ ASCII_DIGIT+)?
  | "." ~ ASCII_DIGIT+ ~ (("e" | "E") ~ ("+" | "-")? ~ ASCII_DIGIT+)?
}
ident = @{ (ASCII_ALPHA | "_") ~ (ASCII_ALPHANUMERIC | "_")* }

un_op = { "-" | "!" }
pow_op = { "^" }
mul_op = { "*" | "/" | "%" }
add_op = { "+" | "-" }
cmp_op = { "<=" | ">=" | "==" | "!=" | "<" | ">" }
log_op = { "&&" | "||" }

func = { ident ~ "(" ~ arg_list? ~ ")" }
arg_list = { expr ~ ("," ~ expr)* }
group = { "~"? ~ "(" ~ expr ~ ("," ~ expr)* ~ ")" }

primary = { number | func | ident | group }
unary = { un_op* ~ primary }
power = { unary ~ (pow_op ~ unary)* }
term = { power ~ (mul_op ~ power)* }
arith = { term ~ (add_op ~ term)* }
comparison = { arith ~ (cmp_op ~ arith)* }
logical = { comparison ~ (log_op ~ comparison)* }
ternary = { logical ~ ("?" ~ expr ~ ":" ~ expr)? }
assign = { ident ~ ":=" ~ expr }
expr = { assign | ternary }
input = { SOI ~ expr ~ EOI }
"#]
struct ExprParser;

/// Binary operators, in evaluation form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

/// Builtin functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Ln,
    Log10,
    Exp,
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tan,
    Fmod,
    Pow,
    Min,
    Max,
    Rand,
    Srand,
    Rand2,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        Some(match name {
            "ln" | "log" => (Func::Ln, 1),
            "log10" => (Func::Log10, 1),
            "exp" => (Func::Exp, 1),
            "sqrt" => (Func::Sqrt, 1),
            "abs" => (Func::Abs, 1),
            "sin" => (Func::Sin, 1),
            "cos" => (Func::Cos, 1),
            "tan" => (Func::Tan, 1),
            "fmod" => (Func::Fmod, 2),
            "pow" => (Func::Pow, 2),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            "rand" => (Func::Rand, 0),
            "srand" => (Func::Srand, 1),
            "rand2" => (Func::Rand2, 2),
            _ => return None,
        })
    }
}

/// Compiled expression tree. Variables are slot indices.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Var(usize),
    Assign(usize, Box<Node>),
    Neg(Box<Node>),
    Not(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
    Seq(Vec<Node>),
}

/// An expression compiled against a fixed list of variable names.
///
/// The variable list defines the slot layout: `eval` reads and writes
/// `slots[i]` for the variable declared at position `i`. The caller owns the
/// buffer, so a gate can keep its inputs and helper scalars in one flat
/// array and share it across its alpha and beta expressions.
///
/// # Examples
///
/// ```
/// use rate_expr::CompiledExpr;
///
/// let expr = CompiledExpr::compile("v * 2 + 1", &["v"]).unwrap();
/// let mut slots = [3.0];
/// assert_eq!(expr.eval(&mut slots), 7.0);
/// ```
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    src: String,
    vars: Vec<String>,
    root: Node,
}

impl CompiledExpr {
    /// Compile `src` against the declared variable names.
    ///
    /// Every identifier in the expression must be a declared variable, a
    /// constant (`pi`, `e`) or a builtin function name; anything else is
    /// rejected with its byte position.
    pub fn compile(src: &str, vars: &[&str]) -> Result<Self> {
        let mut pairs = ExprParser::parse(Rule::input, src).map_err(|e| {
            let position = match e.location {
                pest::error::InputLocation::Pos(p) => p,
                pest::error::InputLocation::Span((p, _)) => p,
            };
            ExprError::Parse {
                position,
                message: e.variant.message().into_owned(),
            }
        })?;
        let input = pairs.next().expect("input rule always present");
        let expr = input.into_inner().next().expect("expr inside input");
        let root = build_expr(expr, vars)?;
        Ok(Self {
            src: src.to_string(),
            vars: vars.iter().map(|v| v.to_string()).collect(),
            root,
        })
    }

    /// Evaluate against the slot buffer.
    ///
    /// `slots` must be at least as long as the declared variable list.
    /// Assignments in the expression write through to the buffer.
    pub fn eval(&self, slots: &mut [f64]) -> f64 {
        debug_assert!(slots.len() >= self.vars.len());
        eval_node(&self.root, slots)
    }

    /// The source string this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.src
    }

    /// The declared variable names, in slot order.
    pub fn variables(&self) -> &[String] {
        &self.vars
    }
}

fn var_index(name: &str, vars: &[&str]) -> Option<usize> {
    vars.iter().position(|v| *v == name)
}

fn build_expr(pair: Pair<Rule>, vars: &[&str]) -> Result<Node> {
    debug_assert_eq!(pair.as_rule(), Rule::expr);
    let inner = pair.into_inner().next().expect("expr has one child");
    match inner.as_rule() {
        Rule::assign => build_assign(inner, vars),
        Rule::ternary => build_ternary(inner, vars),
        other => unreachable!("unexpected rule under expr: {:?}", other),
    }
}

fn build_assign(pair: Pair<Rule>, vars: &[&str]) -> Result<Node> {
    let position = pair.as_span().start();
    let mut inner = pair.into_inner();
    let target = inner.next().expect("assign target");
    let value = inner.next().expect("assign value");
    let name = target.as_str();
    let idx = var_index(name, vars).ok_or_else(|| ExprError::UnknownVariable {
        name: name.to_string(),
        position,
    })?;
    Ok(Node::Assign(idx, Box::new(build_expr(value, vars)?)))
}

fn build_ternary(pair: Pair<Rule>, vars: &[&str]) -> Result<Node> {
    let mut inner = pair.into_inner();
    let cond = build_left_chain(inner.next().expect("ternary condition"), vars)?;
    match (inner.next(), inner.next()) {
        (Some(then), Some(otherwise)) => Ok(Node::Ternary(
            Box::new(cond),
            Box::new(build_expr(then, vars)?),
            Box::new(build_expr(otherwise, vars)?),
        )),
        _ => Ok(cond),
    }
}

/// Fold a `operand (op operand)*` chain left to right. `^` chains are folded
/// right to left to keep exponentiation right-associative.
fn build_left_chain(pair: Pair<Rule>, vars: &[&str]) -> Result<Node> {
    match pair.as_rule() {
        Rule::logical | Rule::comparison | Rule::arith | Rule::term => {
            let mut inner = pair.into_inner();
            let mut node = build_left_chain(inner.next().expect("chain head"), vars)?;
            while let Some(op) = inner.next() {
                let rhs = build_left_chain(inner.next().expect("chain operand"), vars)?;
                node = Node::Bin(bin_op(op.as_str()), Box::new(node), Box::new(rhs));
            }
            Ok(node)
        }
        Rule::power => {
            let mut parts = Vec::new();
            for item in pair.into_inner() {
                if item.as_rule() != Rule::pow_op {
                    parts.push(build_unary(item, vars)?);
                }
            }
            let mut node = parts.pop().expect("power chain head");
            while let Some(lhs) = parts.pop() {
                node = Node::Bin(BinOp::Pow, Box::new(lhs), Box::new(node));
            }
            Ok(node)
        }
        other => unreachable!("unexpected rule in chain: {:?}", other),
    }
}

fn bin_op(text: &str) -> BinOp {
    match text {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Rem,
        "^" => BinOp::Pow,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        other => unreachable!("unexpected operator {:?}", other),
    }
}

fn build_unary(pair: Pair<Rule>, vars: &[&str]) -> Result<Node> {
    debug_assert_eq!(pair.as_rule(), Rule::unary);
    let mut ops = Vec::new();
    let mut primary = None;
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::un_op => ops.push(item.as_str().to_string()),
            Rule::primary => primary = Some(item),
            other => unreachable!("unexpected rule in unary: {:?}", other),
        }
    }
    let mut node = build_primary(primary.expect("unary primary"), vars)?;
    for op in ops.iter().rev() {
        node = match op.as_str() {
            "-" => Node::Neg(Box::new(node)),
            _ => Node::Not(Box::new(node)),
        };
    }
    Ok(node)
}

fn build_primary(pair: Pair<Rule>, vars: &[&str]) -> Result<Node> {
    let inner = pair.into_inner().next().expect("primary has one child");
    match inner.as_rule() {
        Rule::number => {
            let position = inner.as_span().start();
            inner
                .as_str()
                .parse::<f64>()
                .map(Node::Num)
                .map_err(|e| ExprError::Parse {
                    position,
                    message: e.to_string(),
                })
        }
        Rule::func => build_call(inner, vars),
        Rule::ident => {
            let name = inner.as_str();
            let position = inner.as_span().start();
            if let Some(idx) = var_index(name, vars) {
                Ok(Node::Var(idx))
            } else {
                match name {
                    "pi" => Ok(Node::Num(std::f64::consts::PI)),
                    "e" => Ok(Node::Num(std::f64::consts::E)),
                    _ => Err(ExprError::UnknownVariable {
                        name: name.to_string(),
                        position,
                    }),
                }
            }
        }
        Rule::group => {
            let mut items = Vec::new();
            for item in inner.into_inner() {
                items.push(build_expr(item, vars)?);
            }
            if items.len() == 1 {
                Ok(items.pop().expect("single group item"))
            } else {
                Ok(Node::Seq(items))
            }
        }
        other => unreachable!("unexpected rule under primary: {:?}", other),
    }
}

fn build_call(pair: Pair<Rule>, vars: &[&str]) -> Result<Node> {
    let position = pair.as_span().start();
    let mut inner = pair.into_inner();
    let name_pair = inner.next().expect("function name");
    let name = name_pair.as_str();
    let mut args = Vec::new();
    if let Some(list) = inner.next() {
        for arg in list.into_inner() {
            args.push(build_expr(arg, vars)?);
        }
    }
    let (func, arity) = Func::lookup(name).ok_or_else(|| ExprError::UnknownFunction {
        name: name.to_string(),
        position,
    })?;
    if args.len() != arity {
        return Err(ExprError::WrongArity {
            name: name.to_string(),
            expected: arity,
            got: args.len(),
            position,
        });
    }
    Ok(Node::Call(func, args))
}

fn eval_node(node: &Node, slots: &mut [f64]) -> f64 {
    match node {
        Node::Num(x) => *x,
        Node::Var(i) => slots[*i],
        Node::Assign(i, value) => {
            let x = eval_node(value, slots);
            slots[*i] = x;
            x
        }
        Node::Neg(x) => -eval_node(x, slots),
        Node::Not(x) => {
            if eval_node(x, slots) == 0.0 {
                1.0
            } else {
                0.0
            }
        }
        Node::Bin(op, lhs, rhs) => {
            let a = eval_node(lhs, slots);
            match op {
                BinOp::And => {
                    if a == 0.0 {
                        return 0.0;
                    }
                    bool_to_f64(eval_node(rhs, slots) != 0.0)
                }
                BinOp::Or => {
                    if a != 0.0 {
                        return 1.0;
                    }
                    bool_to_f64(eval_node(rhs, slots) != 0.0)
                }
                _ => {
                    let b = eval_node(rhs, slots);
                    match op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        BinOp::Mul => a * b,
                        BinOp::Div => a / b,
                        BinOp::Rem => a % b,
                        BinOp::Pow => a.powf(b),
                        BinOp::Lt => bool_to_f64(a < b),
                        BinOp::Le => bool_to_f64(a <= b),
                        BinOp::Gt => bool_to_f64(a > b),
                        BinOp::Ge => bool_to_f64(a >= b),
                        BinOp::Eq => bool_to_f64(a == b),
                        BinOp::Ne => bool_to_f64(a != b),
                        BinOp::And | BinOp::Or => unreachable!("handled above"),
                    }
                }
            }
        }
        Node::Ternary(cond, then, otherwise) => {
            if eval_node(cond, slots) != 0.0 {
                eval_node(then, slots)
            } else {
                eval_node(otherwise, slots)
            }
        }
        Node::Call(func, args) => eval_call(*func, args, slots),
        Node::Seq(items) => {
            let mut last = 0.0;
            for item in items {
                last = eval_node(item, slots);
            }
            last
        }
    }
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval_call(func: Func, args: &[Node], slots: &mut [f64]) -> f64 {
    match func {
        Func::Rand => rand::thread_rng().gen::<f64>(),
        Func::Srand => {
            let seed = eval_node(&args[0], slots);
            SmallRng::seed_from_u64(seed.to_bits()).gen::<f64>()
        }
        Func::Rand2 => {
            let lo = eval_node(&args[0], slots);
            let hi = eval_node(&args[1], slots);
            lo + (hi - lo) * rand::thread_rng().gen::<f64>()
        }
        Func::Ln => eval_node(&args[0], slots).ln(),
        Func::Log10 => eval_node(&args[0], slots).log10(),
        Func::Exp => eval_node(&args[0], slots).exp(),
        Func::Sqrt => eval_node(&args[0], slots).sqrt(),
        Func::Abs => eval_node(&args[0], slots).abs(),
        Func::Sin => eval_node(&args[0], slots).sin(),
        Func::Cos => eval_node(&args[0], slots).cos(),
        Func::Tan => eval_node(&args[0], slots).tan(),
        Func::Fmod => {
            let a = eval_node(&args[0], slots);
            let b = eval_node(&args[1], slots);
            a % b
        }
        Func::Pow => {
            let a = eval_node(&args[0], slots);
            let b = eval_node(&args[1], slots);
            a.powf(b)
        }
        Func::Min => {
            let a = eval_node(&args[0], slots);
            let b = eval_node(&args[1], slots);
            a.min(b)
        }
        Func::Max => {
            let a = eval_node(&args[0], slots);
            let b = eval_node(&args[1], slots);
            a.max(b)
        }
    }
}
