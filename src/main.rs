use std::{io::Write, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use loxwalk::{
    interpreter::{Interpreter, DEFAULT_MAX_CALL_DEPTH},
    resolver::Resolver,
    Lox, LoxError,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Tree-walking interpreter for Lox")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log filter directive, e.g. `debug` or `loxwalk::interpreter=trace`.
    /// `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Maximum nesting of function calls before reporting a stack overflow.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,
}

impl Cli {
    fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Repl)
    }

    fn session(&self) -> Lox {
        Lox::with_interpreter(Interpreter::default().with_max_call_depth(self.max_call_depth))
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a script file.
    Run(FileArgs),
    /// Read and run lines interactively, keeping state between lines.
    Repl,
    /// Print the tokens of a script file.
    Tokens(FileArgs),
    /// Print the resolved syntax tree of a script file.
    Ast(FileArgs),
    /// Time a recursive fib in Lox against the same function in Rust.
    Bench(BenchArgs),
}

#[derive(Debug, Args)]
struct FileArgs {
    file: String,
}

#[derive(Debug, Args)]
struct BenchArgs {
    #[arg(default_value_t = 30)]
    n: u32,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    install_tracing(&args.log_level);

    let result = match args.command() {
        Command::Repl => repl_command(&args),
        Command::Run(file) => run_command(&args, file),
        Command::Tokens(file) => tokens_command(file),
        Command::Ast(file) => ast_command(file),
        Command::Bench(bench) => benchmark_command(&args, bench),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Lox(e)) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
        Err(CliError::Io { path, source }) => {
            eprintln!("Could not read {path}: {source}");
            ExitCode::from(66)
        }
    }
}

fn install_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Lox(#[from] LoxError),
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

fn read_source(path: &str) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_string(),
        source,
    })
}

fn repl_command(args: &Cli) -> Result<(), CliError> {
    println!("Welcome to the Lox REPL!");
    println!("EOF to exit. (Ctrl+D on *nix, Ctrl+Z on Windows)");

    let mut lox = args.session();
    let mut input = String::new();

    loop {
        print!("> ");
        let read = std::io::stdout()
            .flush()
            .and_then(|()| std::io::stdin().read_line(&mut input))
            .map_err(|source| CliError::Io {
                path: "<stdin>".to_string(),
                source,
            })?;

        if read == 0 {
            break;
        }

        if let Err(e) = lox.run(input.trim()) {
            eprintln!("{e}");
        }

        input.clear()
    }

    Ok(())
}

fn run_command(args: &Cli, file: &FileArgs) -> Result<(), CliError> {
    let source = read_source(&file.file)?;
    args.session().run(&source)?;
    Ok(())
}

fn tokens_command(file: &FileArgs) -> Result<(), CliError> {
    let source = read_source(&file.file)?;
    let tokens = loxwalk::tokenizer::tokens(&source).map_err(LoxError::from)?;

    let mut line = 0;
    for token in tokens {
        if token.line != line {
            print!("{:4} ", token.line);
            line = token.line;
        } else {
            print!("   | ");
        }

        println!("{:<14} {}", format!("{:?}", token.token_type), token.lexeme);
    }

    Ok(())
}

fn ast_command(file: &FileArgs) -> Result<(), CliError> {
    let source = read_source(&file.file)?;
    let tokens = loxwalk::tokenizer::tokens(&source).map_err(LoxError::from)?;
    let mut program = loxwalk::parser::program(&tokens).map_err(LoxError::from)?;
    Resolver::new()
        .resolve(&mut program)
        .map_err(LoxError::from)?;
    println!("{program}");
    Ok(())
}

fn benchmark_command(args: &Cli, bench: &BenchArgs) -> Result<(), CliError> {
    let source = lox_fib_source(bench.n);

    let start = std::time::Instant::now();
    args.session().run(&source)?;
    let lox_elapsed = start.elapsed();
    println!("Lox Took: {:?}", lox_elapsed);

    let start = std::time::Instant::now();
    println!("{}", fib(bench.n.into()));
    let fib_elapsed = start.elapsed();
    println!("Fib Took: {:?}", fib_elapsed);

    println!(
        "Rust is {}x faster than loxwalk",
        lox_elapsed.as_secs_f64() / fib_elapsed.as_secs_f64()
    );

    Ok(())
}

fn lox_fib_source(n: u32) -> String {
    format!(
        r#"
    fun fib(n) {{
        if (n <= 1) {{
            return n;
        }}
        return fib(n - 1) + fib(n - 2);
    }}

    print fib({n});
    "#
    )
}

fn fib(n: i64) -> i64 {
    if n <= 1 {
        return n;
    }
    fib(n - 1) + fib(n - 2)
}
