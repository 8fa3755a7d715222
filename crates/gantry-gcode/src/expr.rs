//! Numeric expressions: `[1+2]`, `#5`, `#<_x>`, `SIN[30]`, `ATAN[1]/[1]`.
//!
//! A precedence-climbing evaluator over the tokenizer's [`Cursor`]. Binary
//! operators are left-associative within their level:
//!
//! | level | operators |
//! |-------|-----------|
//! | 0 | `AND` `OR` `XOR` |
//! | 1 | `EQ` `NE` `GT` `GE` `LT` `LE` |
//! | 2 | `+` `-` |
//! | 3 | `*` `/` `MOD` |
//! | 4 | `**` |
//!
//! Negation and the bracketed functions bind tighter than all of them.
//! Logic, comparison and `MOD` operate on the values truncated to integers.
//! Angles are in degrees.

use crate::{
    config::ParserConfig,
    lexer::Cursor,
    params::{Parameter, Parameters},
};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("expected a digit")]
    MissingDigits,
    #[error("number has too many digits")]
    TooManyDigits,
    #[error("unexpected end of line")]
    UnexpectedEnd,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("'{0}' must be followed by '['")]
    ExpectedBracket(String),
    #[error("missing ']'")]
    UnclosedBracket,
    #[error("ATAN requires the form ATAN[y]/[x]")]
    AtanWithoutDivisor,
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid parameter #{0}")]
    InvalidParameter(f64),
    #[error("unknown parameter #<{0}>")]
    UnknownParameter(String),
    #[error("missing '>'")]
    UnclosedName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "AND" => Self::And,
            "OR" => Self::Or,
            "XOR" => Self::Xor,
            "EQ" => Self::Eq,
            "NE" => Self::Ne,
            "GT" => Self::Gt,
            "GE" => Self::Ge,
            "LT" => Self::Lt,
            "LE" => Self::Le,
            "MOD" => Self::Mod,
            _ => return None,
        })
    }

    fn level(self) -> u8 {
        match self {
            Self::And | Self::Or | Self::Xor => 0,
            Self::Eq | Self::Ne | Self::Gt | Self::Ge | Self::Lt | Self::Le => 1,
            Self::Add | Self::Sub => 2,
            Self::Mul | Self::Div | Self::Mod => 3,
            Self::Pow => 4,
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> Result<f64, ExprError> {
        let (a, b) = (lhs as i64, rhs as i64);
        let flag = |v: bool| if v { 1.0 } else { 0.0 };
        Ok(match self {
            Self::And => (a & b) as f64,
            Self::Or => (a | b) as f64,
            Self::Xor => (a ^ b) as f64,
            Self::Eq => flag(a == b),
            Self::Ne => flag(a != b),
            Self::Gt => flag(a > b),
            Self::Ge => flag(a >= b),
            Self::Lt => flag(a < b),
            Self::Le => flag(a <= b),
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div if rhs == 0.0 => return Err(ExprError::DivisionByZero),
            Self::Div => lhs / rhs,
            Self::Mod => a.checked_rem(b).ok_or(ExprError::DivisionByZero)? as f64,
            Self::Pow => lhs.powf(rhs),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Sqrt,
    Cos,
    Sin,
    Tan,
    Acos,
    Asin,
    Atan,
    Exp,
    Ln,
    Abs,
    Fix,
    Fup,
    Round,
    Exists,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "SQRT" => Self::Sqrt,
            "COS" => Self::Cos,
            "SIN" => Self::Sin,
            "TAN" => Self::Tan,
            "ACOS" => Self::Acos,
            "ASIN" => Self::Asin,
            "ATAN" => Self::Atan,
            "EXP" => Self::Exp,
            "LN" => Self::Ln,
            "ABS" => Self::Abs,
            "FIX" => Self::Fix,
            "FUP" => Self::Fup,
            "ROUND" => Self::Round,
            "EXISTS" => Self::Exists,
            _ => return None,
        })
    }

    fn apply(self, arg: f64, config: &ParserConfig) -> f64 {
        match self {
            Self::Sqrt => arg.sqrt(),
            Self::Cos => arg.to_radians().cos(),
            Self::Sin => arg.to_radians().sin(),
            Self::Tan => arg.to_radians().tan(),
            Self::Acos => arg.acos().to_degrees(),
            Self::Asin => arg.asin().to_degrees(),
            // handled by the caller together with its divisor
            Self::Atan => arg,
            Self::Exp => arg.exp(),
            Self::Ln => arg.ln(),
            Self::Abs => arg.abs(),
            Self::Fix => arg.floor(),
            Self::Fup => arg.ceil(),
            Self::Round => arg.round(),
            Self::Exists => {
                let valid = arg >= 1.0
                    && arg.fract() == 0.0
                    && arg <= f64::from(config.max_user_vars);
                if valid { 1.0 } else { 0.0 }
            }
        }
    }
}

/// Reads a word value: a plain number, or an expression when the value
/// starts with `[`, `#` or a letter.
pub(crate) fn value(
    cursor: &mut Cursor<'_>,
    config: &ParserConfig,
    params: &dyn Parameters,
) -> Result<f64, ExprError> {
    match cursor.peek() {
        Some('[' | '#' | 'A'..='Z') => Evaluator {
            cursor,
            config,
            params,
        }
        .expression(0),
        Some(_) => number(cursor),
        None => Err(ExprError::UnexpectedEnd),
    }
}

/// Digit-by-digit decimal literal with an optional sign.
pub(crate) fn number(cursor: &mut Cursor<'_>) -> Result<f64, ExprError> {
    const MAX_DIGITS: u32 = 18;

    let negative = match cursor.peek() {
        Some('-') => {
            cursor.bump();
            true
        }
        Some('+') => {
            cursor.bump();
            false
        }
        _ => false,
    };

    let mut mantissa: u64 = 0;
    let mut digits = 0u32;
    let mut fraction_digits = 0i32;
    let mut seen_point = false;

    while let Some(ch) = cursor.peek() {
        match ch {
            '0'..='9' => {
                cursor.bump();
                digits += 1;
                if digits > MAX_DIGITS {
                    return Err(ExprError::TooManyDigits);
                }
                mantissa = mantissa * 10 + u64::from(ch as u8 - b'0');
                if seen_point {
                    fraction_digits += 1;
                }
            }
            '.' if !seen_point => {
                cursor.bump();
                seen_point = true;
            }
            _ => break,
        }
    }

    if digits == 0 {
        return Err(ExprError::MissingDigits);
    }

    let value = mantissa as f64 / 10f64.powi(fraction_digits);
    Ok(if negative { -value } else { value })
}

struct Evaluator<'c, 'a> {
    cursor: &'c mut Cursor<'a>,
    config: &'c ParserConfig,
    params: &'c dyn Parameters,
}

impl<'a> Evaluator<'_, 'a> {
    fn expression(&mut self, min_level: u8) -> Result<f64, ExprError> {
        let mut lhs = self.operand()?;
        while let Some((op, ahead)) = self.peek_binary() {
            if op.level() < min_level {
                break;
            }
            *self.cursor = ahead;
            let rhs = self.expression(op.level() + 1)?;
            lhs = op.apply(lhs, rhs)?;
        }
        Ok(lhs)
    }

    /// Looks at the next binary operator without consuming it. Returns the
    /// cursor positioned after it.
    fn peek_binary(&self) -> Option<(BinaryOp, Cursor<'a>)> {
        let mut ahead = self.cursor.clone();
        let op = match ahead.bump()? {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '/' => BinaryOp::Div,
            '*' => {
                if ahead.peek() == Some('*') {
                    ahead.bump();
                    BinaryOp::Pow
                } else {
                    BinaryOp::Mul
                }
            }
            ch @ 'A'..='Z' => {
                let mut name = String::from(ch);
                while let Some(next @ 'A'..='Z') = ahead.peek() {
                    name.push(next);
                    ahead.bump();
                }
                BinaryOp::from_name(&name)?
            }
            _ => return None,
        };
        Some((op, ahead))
    }

    fn operand(&mut self) -> Result<f64, ExprError> {
        match self.cursor.peek() {
            None => Err(ExprError::UnexpectedEnd),
            Some('-') => {
                self.cursor.bump();
                Ok(-self.operand()?)
            }
            Some('+') => {
                self.cursor.bump();
                self.operand()
            }
            Some('[') => self.bracketed(),
            Some('#') => {
                self.cursor.bump();
                if self.cursor.peek() == Some('<') {
                    return self.named();
                }
                let index = self.operand()?;
                let parameter = Parameter::decode(index, self.config)
                    .ok_or(ExprError::InvalidParameter(index))?;
                Ok(self.params.read(parameter))
            }
            Some('0'..='9' | '.') => number(self.cursor),
            Some('A'..='Z') => self.function(),
            Some(other) => Err(ExprError::UnexpectedChar(other)),
        }
    }

    /// `#<name>`, with the cursor on the `<`.
    fn named(&mut self) -> Result<f64, ExprError> {
        self.cursor.bump();
        let mut name = String::new();
        loop {
            match self.cursor.bump() {
                Some('>') => break,
                Some(ch) => name.push(ch),
                None => return Err(ExprError::UnclosedName),
            }
        }
        let parameter = Parameter::named(&name, self.config)
            .ok_or(ExprError::UnknownParameter(name))?;
        Ok(self.params.read(parameter))
    }

    fn bracketed(&mut self) -> Result<f64, ExprError> {
        self.cursor.bump();
        let value = self.expression(0)?;
        match self.cursor.bump() {
            Some(']') => Ok(value),
            _ => Err(ExprError::UnclosedBracket),
        }
    }

    fn function(&mut self) -> Result<f64, ExprError> {
        let mut name = String::new();
        while let Some(ch @ 'A'..='Z') = self.cursor.peek() {
            name.push(ch);
            self.cursor.bump();
        }
        let function =
            Function::from_name(&name).ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
        if self.cursor.peek() != Some('[') {
            return Err(ExprError::ExpectedBracket(name));
        }
        let arg = self.bracketed()?;

        if function == Function::Atan {
            if self.cursor.peek() != Some('/') {
                return Err(ExprError::AtanWithoutDivisor);
            }
            self.cursor.bump();
            let x = self.operand()?;
            return Ok(arg.atan2(x).to_degrees());
        }

        Ok(function.apply(arg, self.config))
    }
}
