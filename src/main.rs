use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fnvm::codegen;
use fnvm::config::VmConfig;
use fnvm::diagnostic::ansi::AnsiRenderer;
use fnvm::diagnostic::{json, registry, Diagnostic};
use fnvm::interpreter;
use fnvm::parser::{self, Definition, SymbolTable};
use fnvm::vm::traps::TrapId;
use fnvm::vm::{FunctionHandle, FunctionVM, SourceInfo};

/// Compile and evaluate render-time scalar functions.
#[derive(Parser, Debug)]
#[command(name = "fnvm", version, after_help = EXAMPLES)]
struct Cli {
    /// Function body, e.g. "sqrt(x*x + y*y) - 1"
    #[arg(required_unless_present = "explain")]
    expr: Option<String>,

    /// Parameter values in order; missing ones are 0
    #[arg(allow_negative_numbers = true)]
    args: Vec<f64>,

    /// Extra function "name(a, b) = body" or "name = internal(N)"; may refer to each other
    #[arg(short = 'd', long = "define", value_name = "DEF")]
    define: Vec<String>,

    /// Bind NAME to the next global slot with initial value V
    #[arg(short = 'g', long = "global", value_name = "NAME=V")]
    global: Vec<String>,

    /// Declare a named constant
    #[arg(short = 'c', long = "constant", value_name = "NAME=V")]
    constant: Vec<String>,

    /// Comma separated parameters of EXPR [default: x,y,z]
    #[arg(short = 'p', long = "params", value_name = "LIST")]
    params: Option<String>,

    /// Value of the `clock` keyword
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    clock: f64,

    /// Print the bytecode instead of evaluating
    #[arg(long)]
    disasm: bool,

    /// Print the optimised expression tree as JSON
    #[arg(long)]
    tree: bool,

    /// Evaluate with the tree-walking interpreter instead of the VM
    #[arg(long)]
    interpret: bool,

    /// Evaluate at N random points in [-1, 1] and print min/max/mean
    #[arg(long, value_name = "N")]
    samples: Option<usize>,

    /// JSON file with VM limits
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Diagnostics as JSON, one object per line
    #[arg(long)]
    json: bool,

    /// Diagnostics as plain text
    #[arg(long)]
    text: bool,

    /// Diagnostics as coloured text
    #[arg(long)]
    ansi: bool,

    /// Explain an error code, e.g. FN-C002
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,
}

const EXAMPLES: &str = "\
Examples:
  fnvm 'x*x + y*y' 3 4
  fnvm -d 'g(a, b) = a * b' 'g(x, 2) + 1' 5
  fnvm -d 'sphere = internal(3)' 'sphere(x, y, z, 1)' 0 0 2
  fnvm --disasm 'sum(i, 1, 10, i * x)'";

enum Format {
    Text { color: bool },
    Json,
}

struct Reporter {
    format: Format,
}

impl Reporter {
    fn emit(&self, d: &Diagnostic) {
        match self.format {
            Format::Json => eprintln!("{}", json::render(d)),
            Format::Text { color } => eprint!("{}", AnsiRenderer { use_color: color }.render(d)),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if [cli.json, cli.text, cli.ansi].iter().filter(|f| **f).count() > 1 {
        eprintln!("error: --json, --text and --ansi are mutually exclusive");
        return ExitCode::FAILURE;
    }
    let format = if cli.json {
        Format::Json
    } else if cli.text {
        Format::Text { color: false }
    } else if cli.ansi {
        Format::Text { color: true }
    } else {
        let color = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        Format::Text { color }
    };
    let out = Reporter { format };

    if let Some(code) = &cli.explain {
        return match registry::lookup(code) {
            Some(entry) => {
                print!("{}", entry.long);
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("error: unknown error code '{code}'");
                ExitCode::FAILURE
            }
        };
    }

    match run(&cli, &out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            out.emit(&d);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, out: &Reporter) -> Result<(), Diagnostic> {
    let config = match &cli.config {
        Some(path) => VmConfig::load(path).map_err(|e| Diagnostic::from(&e))?,
        None => VmConfig::default(),
    };
    let mut vm = FunctionVM::with_config(config);
    let mut env = SymbolTable::new();
    env.clock = cli.clock;

    for c in &cli.constant {
        let (name, value) = binding(c)?;
        env.define_constant(name, value);
    }
    for g in &cli.global {
        let (name, value) = binding(g)?;
        let k = env.define_global(name);
        vm.set_global(k as usize, value);
    }
    let defined = define_functions(&mut vm, &mut env, &cli.define, out)?;

    let parameters = match &cli.params {
        Some(list) => parser::parse_parameter_names(list).map_err(|e| Diagnostic::from(&e).with_source(list.as_str()))?,
        None => parser::default_parameters(),
    };
    let expr = cli.expr.as_deref().unwrap_or_default();
    if cli.args.len() > parameters.len() {
        return Err(Diagnostic::error(format!(
            "{} arguments supplied, the expression has {} parameters",
            cli.args.len(),
            parameters.len()
        ))
        .with_note(format!("parameters: {}", parameters.join(", "))));
    }
    let mut args = cli.args.clone();
    args.resize(parameters.len(), 0.0);

    if cli.tree {
        let tree = parser::parse_expression(expr, &parameters, &env, &mut vm)
            .map_err(|e| Diagnostic::from(&e).with_source(expr))?;
        let text = serde_json::to_string_pretty(&tree.to_json()).unwrap_or_default();
        tree.release(&mut vm);
        println!("{text}");
        return Ok(());
    }

    if cli.interpret {
        let tree = parser::parse_unoptimised(expr, &parameters, &env, &mut vm)
            .map_err(|e| Diagnostic::from(&e).with_source(expr))?;
        let result = interpreter::evaluate(&tree, &parameters, &args, &env, &vm);
        tree.release(&mut vm);
        println!("{}", result.map_err(|e| Diagnostic::from(&e))?);
        return Ok(());
    }

    let compiled = codegen::compile_function(&mut vm, &env, expr, SourceInfo::default(), parameters.clone())
        .map_err(|e| Diagnostic::from(&e).with_source(expr))?;
    for w in compiled.warnings {
        out.emit(&w.with_source(expr));
    }

    if cli.disasm {
        for h in defined.into_iter().chain([compiled.handle]) {
            print!("{}", vm.disassemble(h).map_err(|e| Diagnostic::from(&e))?);
        }
        return Ok(());
    }

    let mut ctx = vm.create_context();
    if let Some(n) = cli.samples {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        let (mut min, mut max, mut total) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
        for _ in 0..n {
            let point: Vec<f64> = (0..parameters.len()).map(|_| rng.f64() * 2.0 - 1.0).collect();
            let v = ctx.evaluate(compiled.handle, &point).map_err(|e| Diagnostic::from(&e))?;
            min = min.min(v);
            max = max.max(v);
            total += v;
        }
        if n == 0 {
            println!("no samples");
        } else {
            println!("min {min} max {max} mean {}", total / n as f64);
        }
        return Ok(());
    }

    let value = ctx.evaluate(compiled.handle, &args).map_err(|e| Diagnostic::from(&e))?;
    println!("{value}");
    Ok(())
}

/// `NAME=VALUE`
fn binding(text: &str) -> Result<(String, f64), Diagnostic> {
    let invalid = || Diagnostic::error(format!("invalid binding '{text}'")).with_suggestion("write NAME=VALUE, e.g. r=0.5");
    let (name, value) = text.split_once('=').ok_or_else(invalid)?;
    let value: f64 = value.trim().parse().map_err(|_| invalid())?;
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid());
    }
    Ok((name.to_string(), value))
}

/// Declares every `-d` function first, so bodies can call functions defined
/// after them, then compiles the bodies in order.
fn define_functions(
    vm: &mut FunctionVM,
    env: &mut SymbolTable,
    definitions: &[String],
    out: &Reporter,
) -> Result<Vec<FunctionHandle>, Diagnostic> {
    let mut pending: Vec<(&str, Definition, FunctionHandle)> = Vec::new();
    let mut handles = Vec::new();

    for text in definitions {
        let def = parser::parse_definition(text).map_err(|e| Diagnostic::from(&e).with_source(text.as_str()))?;
        let info = SourceInfo::named(def.name.clone());
        let handle = match def.internal() {
            Some(n) => {
                let names = if def.explicit_parameters { def.parameters.clone() } else { Vec::new() };
                codegen::compile_trap_function(vm, info, TrapId::Scalar(n), &names, None)
                    .map_err(|e| Diagnostic::from(&e).with_source(text.as_str()))?
            }
            None => {
                let h = vm.declare_function(info, def.parameters.clone()).map_err(|e| Diagnostic::from(&e))?;
                pending.push((text.as_str(), def.clone(), h));
                h
            }
        };
        env.define_function(def.name.clone(), handle);
        handles.push(handle);
    }

    for (text, def, handle) in pending {
        let warnings = codegen::compile_declared(vm, env, handle, &def.body)
            .map_err(|e| located(Diagnostic::from(&e), text, &def))?;
        for w in warnings {
            out.emit(&located(w, text, &def));
        }
    }
    Ok(handles)
}

/// Places a diagnostic from a `-d` body within the whole definition text.
fn located(d: Diagnostic, text: &str, def: &Definition) -> Diagnostic {
    d.shifted(def.body_offset).with_source(text).with_note(format!("in function '{}'", def.name))
}
