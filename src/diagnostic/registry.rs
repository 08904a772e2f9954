/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str, // brief description for tooling
    pub long: &'static str,  // full explanation for --explain
}

/// All stable diagnostic codes.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "FN-L001",
        short: "unexpected character in function",
        long: r#"## FN-L001: unexpected character in function

A character was found that cannot start any token of a function body.
Function bodies consist of numbers, identifiers, the operators
`+ - * / ^ & | = != < <= > >= !`, parentheses, commas and the `.` of a
member access.

**Example:**

    x % 2

There is no remainder operator. Use `mod(x, 2)` instead.
"#,
    },
    // ── Parser ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "FN-P001",
        short: "unexpected token",
        long: r#"## FN-P001: unexpected token

The parser expected one kind of token and found another. The message
names both, for example:

    Expected 'operand', ')' found instead

**Common causes:**
- An operator with a missing operand: `x * `
- Unbalanced parentheses: `(x + 1`
- Two operands next to each other: `2 x`. If the second one is an
  identifier the error carries a hint that the name may be misspelled or
  not declared yet.
"#,
    },
    ErrorEntry {
        code: "FN-P002",
        short: "constant argument outside the domain of an intrinsic",
        long: r#"## FN-P002: domain error

A built-in function was called with a constant argument for which it is
not defined. The optimiser evaluates such calls while compiling and
reports the problem instead of producing NaN.

**Example:**

    ln(0) + x

`ln` and `log` need a strictly positive argument.
"#,
    },
    ErrorEntry {
        code: "FN-P003",
        short: "malformed function header",
        long: r#"## FN-P003: malformed function header

A function definition has the form `name(p1, p2, ...) = body` or
`name = body`. Without a parameter list the parameters are `x, y, z`.

**Common causes:**
- An empty parameter list: `f() = 1`
- A trailing comma: `f(a,) = a`
- More than 56 parameters
"#,
    },
    ErrorEntry {
        code: "FN-P004",
        short: "parentheses nested too deeply",
        long: r#"## FN-P004: parentheses nested too deeply

Groups and call arguments may nest at most 256 levels. Deeper input is
rejected before it can exhaust the parser's stack. Split the expression
into several functions that call each other.
"#,
    },
    // ── Compiler ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "FN-C001",
        short: "wrong number of parameters",
        long: r#"## FN-C001: wrong number of parameters

A call passes a different number of arguments than the callee accepts.

| function | arguments |
|---|---|
| `sin`, `sqrt`, `abs`, ... | exactly one |
| `pow`, `atan2`, `mod`, `div` | exactly two |
| `min`, `max` | two or more |
| `select` | three or four |
| `sum`, `prod` | four |
| user functions | as declared |

**Example:**

    g(a, b) = a * b
    g(x) + 1        -- Invalid number of parameters: 1 supplied, 2 required!
"#,
    },
    ErrorEntry {
        code: "FN-C002",
        short: "division by a constant zero",
        long: r#"## FN-C002: division by zero

The right operand of `/` is the constant 0. Divisions by a value that is
only zero at run time raise a floating-point exception instead.
"#,
    },
    ErrorEntry {
        code: "FN-C003",
        short: "too many local variables",
        long: r#"## FN-C003: too many local variables

Every `sum` or `prod` introduces a local loop variable. At most 56 of them
may be active at once, that is `sum` and `prod` may nest at most 56 deep.
"#,
    },
    ErrorEntry {
        code: "FN-C004",
        short: "loop variable is not a name",
        long: r#"## FN-C004: local variable name expected

The first argument of `sum` and `prod` names the loop variable and must be
a plain identifier.

**Example:**

    sum(1, 1, 10, x)    -- wrong
    sum(i, 1, 10, i*x)  -- right
"#,
    },
    ErrorEntry {
        code: "FN-C005",
        short: "invalid member name",
        long: r#"## FN-C005: invalid member access

The result of a vector function is read with a member name:
`x y z t u v red green blue filter transmit gray grey hf`.

`gray`/`grey` is the weighted intensity of the first three results and
`hf` decodes a height-field value from the first two.
"#,
    },
    ErrorEntry {
        code: "FN-C006",
        short: "undefined identifier",
        long: r#"## FN-C006: undefined identifier

An identifier is neither a parameter, an active `sum`/`prod` variable, a
named constant, a global, a built-in nor a known function.

**Example:**

    x * w       -- 'w' is not a parameter of this function

Declare it as a parameter, or bind it with `--constant` or `--global`.
"#,
    },
    ErrorEntry {
        code: "FN-C007",
        short: "unknown internal function",
        long: r#"## FN-C007: unknown internal function

`internal(N)` selects a native function by number and `N` is out of
range. The scalar internal functions are 0 `f_r`, 1 `f_th`, 2 `f_ph`,
3 `f_sphere`, 4 `f_torus`, 5 `f_ellipsoid`, 6 `f_paraboloid`,
7 `f_rounded_box` and 8 `f_superellipsoid`.
"#,
    },
    // ── Runtime / registry ───────────────────────────────────────────────────
    ErrorEntry {
        code: "FN-R001",
        short: "floating-point exception",
        long: r#"## FN-R001: floating-point exception

Evaluation hit a guarded operation with an invalid operand: a division,
`mod` or `div` by zero, `ln`/`log` of a value that is not positive, or
`0 ^ 0`. The message names the function it happened in.
"#,
    },
    ErrorEntry {
        code: "FN-R002",
        short: "runtime error",
        long: r#"## FN-R002: runtime error

Evaluation ran out of a resource or broke an invariant of the VM. The most
common cause is unbounded recursion:

    Maximum function evaluation recursion level reached.
    Stack full. Possible infinite recursive function call.

Make sure every recursive function has a `select` branch that stops it.
The limits can be raised with `max_call_depth` and `max_stack_size` in a
`--config` file.
"#,
    },
    ErrorEntry {
        code: "FN-R003",
        short: "unknown function",
        long: r#"## FN-R003: unknown user defined function

A function handle does not refer to a live function, or a function body
was installed twice. This points to a bug in the embedding program.
"#,
    },
    ErrorEntry {
        code: "FN-R004",
        short: "registry limit reached",
        long: r#"## FN-R004: registry limit reached

The function registry or the constant pool is full. Both limits are
configurable with `max_functions` and `max_constants`.
"#,
    },
    // ── Warnings ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "FN-W001",
        short: "zero power optimised to 1.0",
        long: r#"## FN-W001: zero power optimised to constant 1.0

`expr ^ 0` is compiled as the constant 1.0 without evaluating `expr`, so a
floating-point exception inside `expr` is no longer raised.
"#,
    },
    ErrorEntry {
        code: "FN-W002",
        short: "recursive function call",
        long: r#"## FN-W002: recursive call

A function calls itself. This is allowed, but evaluation fails with
FN-R002 when the recursion does not terminate.
"#,
    },
];

/// Look up an error entry by code (e.g. `"FN-C002"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_code() {
        let e = lookup("FN-C002").expect("FN-C002 should be in registry");
        assert_eq!(e.code, "FN-C002");
        assert!(!e.short.is_empty());
        assert!(e.long.contains("FN-C002"));
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("FN-X999").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let len_before = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), len_before, "duplicate codes in registry");
    }

    #[test]
    fn every_long_text_starts_with_its_code() {
        for entry in REGISTRY {
            assert!(!entry.short.is_empty(), "{} missing short description", entry.code);
            assert!(entry.long.starts_with(&format!("## {}:", entry.code)), "{} heading", entry.code);
        }
    }
}
