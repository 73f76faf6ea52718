//! 数值计算适配器：四则、乘方、括号、一元负号、常用函数与常量
//!
//! 只做数值求值；出现未知符号（如变量 x）视为符号计算请求，返回 ComputeError::Unsupported。
//! 结果附带 LaTeX 形式，便于作为 equation cue 的载荷。

use serde::{Deserialize, Serialize};

/// 表达式最大字符数；超出直接报解析错误
pub const MAX_EXPRESSION_CHARS: usize = 512;

/// 一元运算与括号的最大嵌套深度
const MAX_DEPTH: usize = 256;

/// 计算结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    pub expression: String,
    pub value: f64,
    /// `<表达式> = <值>` 的 LaTeX
    pub latex: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputeError {
    #[error("unsupported (symbolic) request: {0}")]
    Unsupported(String),

    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Log,
    Sqrt,
    Abs,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "exp" => Func::Exp,
            "ln" => Func::Ln,
            "log" => Func::Log,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            _ => return None,
        })
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Exp => x.exp(),
            Func::Ln => x.ln(),
            Func::Log => x.log10(),
            Func::Sqrt => x.sqrt(),
            Func::Abs => x.abs(),
        }
    }

    fn latex(self, arg: &str) -> String {
        match self {
            Func::Sqrt => format!("\\sqrt{{{arg}}}"),
            Func::Abs => format!("\\left|{arg}\\right|"),
            Func::Exp => format!("e^{{{arg}}}"),
            Func::Sin => format!("\\sin\\left({arg}\\right)"),
            Func::Cos => format!("\\cos\\left({arg}\\right)"),
            Func::Tan => format!("\\tan\\left({arg}\\right)"),
            Func::Ln => format!("\\ln\\left({arg}\\right)"),
            Func::Log => format!("\\log_{{10}}\\left({arg}\\right)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64, String),
    Const(&'static str, f64),
    Neg(Box<Expr>),
    Paren(Box<Expr>),
    Bin(char, Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    fn eval(&self) -> Result<f64, ComputeError> {
        Ok(match self {
            Expr::Num(v, _) | Expr::Const(_, v) => *v,
            Expr::Neg(e) => -e.eval()?,
            Expr::Paren(e) => e.eval()?,
            Expr::Call(f, e) => f.apply(e.eval()?),
            Expr::Bin(op, l, r) => {
                let (a, b) = (l.eval()?, r.eval()?);
                match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => {
                        if b == 0.0 {
                            return Err(ComputeError::DivisionByZero);
                        }
                        a / b
                    }
                    _ => a.powf(b),
                }
            }
        })
    }

    fn latex(&self) -> String {
        match self {
            Expr::Num(_, text) => text.clone(),
            Expr::Const(name, _) => match *name {
                "pi" => "\\pi".to_string(),
                _ => "e".to_string(),
            },
            Expr::Neg(e) => format!("-{}", e.latex()),
            Expr::Paren(e) => format!("\\left({}\\right)", e.latex()),
            Expr::Call(f, e) => f.latex(&e.latex()),
            Expr::Bin(op, l, r) => match op {
                '+' => format!("{} + {}", l.latex(), r.latex()),
                '-' => format!("{} - {}", l.latex(), r.latex()),
                '*' => format!("{} \\cdot {}", l.latex(), r.latex()),
                '/' => format!("\\frac{{{}}}{{{}}}", strip_paren(l).latex(), strip_paren(r).latex()),
                _ => format!("{}^{{{}}}", l.latex(), strip_paren(r).latex()),
            },
        }
    }
}

fn strip_paren(e: &Expr) -> &Expr {
    match e {
        Expr::Paren(inner) => inner,
        other => other,
    }
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            depth: 0,
            source,
        }
    }

    fn error(&self, message: impl Into<String>) -> ComputeError {
        ComputeError::Parse {
            pos: self.pos,
            message: message.into(),
        }
    }

    /// 进入一层嵌套，超过上限时报错
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ComputeError>,
    ) -> Result<T, ComputeError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {MAX_DEPTH}")));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn skip_ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    /// 读取运算符，兼容 `**`、`×`、`÷`
    fn peek_op(&mut self) -> Option<char> {
        match self.peek()? {
            '*' if self.chars.get(self.pos + 1) == Some(&'*') => Some('^'),
            '×' | '·' => Some('*'),
            '÷' => Some('/'),
            c @ ('+' | '-' | '*' | '/' | '^') => Some(c),
            _ => None,
        }
    }

    fn bump_op(&mut self) {
        if self.chars.get(self.pos) == Some(&'*') && self.chars.get(self.pos + 1) == Some(&'*') {
            self.pos += 2;
        } else {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<Expr, ComputeError> {
        let expr = self.expr()?;
        if self.peek().is_some() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn expr(&mut self) -> Result<Expr, ComputeError> {
        let mut lhs = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek_op() {
            self.bump_op();
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ComputeError> {
        let mut lhs = self.unary()?;
        while let Some(op @ ('*' | '/')) = self.peek_op() {
            self.bump_op();
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ComputeError> {
        match self.peek_op() {
            Some('-') => {
                self.bump_op();
                let inner = self.nested(Self::unary)?;
                Ok(Expr::Neg(Box::new(inner)))
            }
            Some('+') => {
                self.bump_op();
                self.nested(Self::unary)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ComputeError> {
        let base = self.atom()?;
        if self.peek_op() == Some('^') {
            self.bump_op();
            let exp = self.nested(Self::unary)?;
            return Ok(Expr::Bin('^', Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ComputeError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.nested(Self::expr)?;
                if self.peek() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == 'π' => self.ident(),
            Some(c) => Err(self.error(format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn number(&mut self) -> Result<Expr, ComputeError> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(|v| Expr::Num(v, text.clone()))
            .map_err(|_| self.error(format!("invalid number '{text}'")))
    }

    fn ident(&mut self) -> Result<Expr, ComputeError> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == 'π')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect::<String>().to_lowercase();
        match name.as_str() {
            "pi" | "π" => return Ok(Expr::Const("pi", std::f64::consts::PI)),
            "e" => return Ok(Expr::Const("e", std::f64::consts::E)),
            _ => {}
        }
        let Some(func) = Func::from_name(&name) else {
            return Err(ComputeError::Unsupported(format!(
                "symbol '{name}' in '{}'",
                self.source.trim()
            )));
        };
        if self.peek() != Some('(') {
            return Err(self.error(format!("expected '(' after {name}")));
        }
        let arg = self.atom()?;
        let arg = match arg {
            Expr::Paren(inner) => inner,
            other => Box::new(other),
        };
        Ok(Expr::Call(func, arg))
    }
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        let s = format!("{v:.6}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// 对数值表达式求值
pub fn evaluate(expression: &str) -> Result<Computation, ComputeError> {
    let len = expression.chars().count();
    if len > MAX_EXPRESSION_CHARS {
        return Err(ComputeError::Parse {
            pos: MAX_EXPRESSION_CHARS,
            message: format!("expression too long ({len} chars)"),
        });
    }
    let expr = Parser::new(expression).parse()?;
    let value = expr.eval()?;
    if !value.is_finite() {
        return Err(ComputeError::NonFinite);
    }
    Ok(Computation {
        expression: expression.trim().to_string(),
        value,
        latex: format!("{} = {}", expr.latex(), format_value(value)),
    })
}

/// 计算适配器接口
pub trait ComputeAdapter: Send + Sync {
    fn compute(&self, expression: &str) -> Result<Computation, ComputeError>;
}

/// 内置数值计算器
#[derive(Debug, Default, Clone, Copy)]
pub struct Calculator;

impl ComputeAdapter for Calculator {
    fn compute(&self, expression: &str) -> Result<Computation, ComputeError> {
        evaluate(expression)
    }
}
