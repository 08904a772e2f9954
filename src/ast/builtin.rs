use crate::vm::intrinsics::{Sys1, Sys2};

/// Intrinsic function names understood by the expression compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Abs,
    Radians,
    Degrees,
    Div,
    Int,
    Floor,
    Ceil,
    Sqrt,
    Exp,
    Ln,
    Log,
    Min,
    Max,
    Atan2,
    Pow,
    Mod,
    Select,
    Sum,
    Prod,
    Sqr,
}

const NAMES: &[(&str, Builtin)] = &[
    ("sin", Builtin::Sin),
    ("cos", Builtin::Cos),
    ("tan", Builtin::Tan),
    ("asin", Builtin::Asin),
    ("acos", Builtin::Acos),
    ("atan", Builtin::Atan),
    ("sinh", Builtin::Sinh),
    ("cosh", Builtin::Cosh),
    ("tanh", Builtin::Tanh),
    ("asinh", Builtin::Asinh),
    ("acosh", Builtin::Acosh),
    ("atanh", Builtin::Atanh),
    ("abs", Builtin::Abs),
    ("radians", Builtin::Radians),
    ("degrees", Builtin::Degrees),
    ("div", Builtin::Div),
    ("int", Builtin::Int),
    ("floor", Builtin::Floor),
    ("ceil", Builtin::Ceil),
    ("sqrt", Builtin::Sqrt),
    ("exp", Builtin::Exp),
    ("ln", Builtin::Ln),
    ("log", Builtin::Log),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("atan2", Builtin::Atan2),
    ("pow", Builtin::Pow),
    ("mod", Builtin::Mod),
    ("select", Builtin::Select),
    ("sum", Builtin::Sum),
    ("prod", Builtin::Prod),
    ("sqr", Builtin::Sqr),
];

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        NAMES.iter().find(|(n, _)| *n == name).map(|&(_, b)| b)
    }

    pub fn name(self) -> &'static str {
        NAMES.iter().find(|(_, b)| *b == self).map(|&(n, _)| n).unwrap_or("?")
    }

    /// One-argument intrinsics evaluated through the `sys1` table.
    pub fn sys1(self) -> Option<Sys1> {
        Some(match self {
            Builtin::Sin => Sys1::Sin,
            Builtin::Cos => Sys1::Cos,
            Builtin::Tan => Sys1::Tan,
            Builtin::Asin => Sys1::Asin,
            Builtin::Acos => Sys1::Acos,
            Builtin::Atan => Sys1::Atan,
            Builtin::Sinh => Sys1::Sinh,
            Builtin::Cosh => Sys1::Cosh,
            Builtin::Tanh => Sys1::Tanh,
            Builtin::Asinh => Sys1::Asinh,
            Builtin::Acosh => Sys1::Acosh,
            Builtin::Atanh => Sys1::Atanh,
            Builtin::Floor => Sys1::Floor,
            Builtin::Ceil => Sys1::Ceil,
            Builtin::Sqrt => Sys1::Sqrt,
            Builtin::Exp => Sys1::Exp,
            Builtin::Ln => Sys1::Ln,
            Builtin::Log => Sys1::Log,
            Builtin::Int => Sys1::Int,
            _ => return None,
        })
    }

    /// Two-argument intrinsics evaluated through the `sys2` table.
    pub fn sys2(self) -> Option<Sys2> {
        Some(match self {
            Builtin::Pow => Sys2::Pow,
            Builtin::Atan2 => Sys2::Atan2,
            Builtin::Mod => Sys2::Mod,
            Builtin::Div => Sys2::Div,
            _ => return None,
        })
    }

    /// Compile-time evaluation of a single constant argument.
    /// `Ok(None)` means the call is not foldable; `Err` is a domain error.
    pub fn fold(self, arg: f64) -> Result<Option<f64>, &'static str> {
        let value = match self {
            Builtin::Abs => arg.abs(),
            Builtin::Radians => arg * std::f64::consts::PI / 180.0,
            Builtin::Degrees => arg * 180.0 / std::f64::consts::PI,
            Builtin::Sqr => arg * arg,
            Builtin::Ln | Builtin::Log if arg <= 0.0 => return Err(self.name()),
            _ => match self.sys1() {
                Some(f) => f.apply(arg),
                None => return Ok(None),
            },
        };
        Ok(Some(value))
    }
}
