//! Native math tables behind the `sys1` and `sys2` instructions.

pub type Sys1Fn = fn(f64) -> f64;
pub type Sys2Fn = fn(f64, f64) -> f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Sys1 {
    Sin = 0,
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
    Floor,
    Ceil,
    Sqrt,
    Exp,
    Ln,
    Log,
    Int,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Sys2 {
    Pow = 0,
    Atan2,
    Mod,
    Div,
}

pub static SYS1_TABLE: [(&str, Sys1Fn); 19] = [
    ("sin", f64::sin),
    ("cos", f64::cos),
    ("tan", f64::tan),
    ("asin", f64::asin),
    ("acos", f64::acos),
    ("atan", f64::atan),
    ("sinh", f64::sinh),
    ("cosh", f64::cosh),
    ("tanh", f64::tanh),
    ("asinh", f64::asinh),
    ("acosh", f64::acosh),
    ("atanh", f64::atanh),
    ("floor", f64::floor),
    ("ceil", f64::ceil),
    ("sqrt", f64::sqrt),
    ("exp", f64::exp),
    ("ln", f64::ln),
    ("log", f64::log10),
    ("int", f64::trunc),
];

pub static SYS2_TABLE: [(&str, Sys2Fn); 4] = [
    ("pow", f64::powf),
    ("atan2", f64::atan2),
    ("mod", math_mod),
    ("div", math_div),
];

/// C `fmod`: the result takes the sign of the dividend.
fn math_mod(a: f64, b: f64) -> f64 {
    a % b
}

/// Integer part of the quotient.
fn math_div(a: f64, b: f64) -> f64 {
    (a / b).trunc()
}

impl Sys1 {
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn apply(self, x: f64) -> f64 {
        (SYS1_TABLE[self as usize].1)(x)
    }
}

impl Sys2 {
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        (SYS2_TABLE[self as usize].1)(a, b)
    }
}

pub fn sys1_name(k: u32) -> &'static str {
    SYS1_TABLE.get(k as usize).map(|e| e.0).unwrap_or("?")
}

pub fn sys2_name(k: u32) -> &'static str {
    SYS2_TABLE.get(k as usize).map(|e| e.0).unwrap_or("?")
}
