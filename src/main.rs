use std::fs;
use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use byteflow::Options;

/// Compiles a small C-like language to an eight-instruction tape machine.
///
/// The program text is written to stdout; diagnostics go to stderr.
#[derive(Debug, StructOpt)]
#[structopt(name = "byteflow")]
struct Opt {
  /// Source file to compile.
  #[structopt(parse(from_os_str))]
  input: PathBuf,

  /// Run the peephole optimizer over the emitted program.
  #[structopt(short = "o", long)]
  optimize: bool,

  /// Report per-phase statistics on stderr.
  #[structopt(short, long)]
  verbose: bool,
}

fn main() {
  let opt = Opt::from_args();

  let source = match fs::read_to_string(&opt.input) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("byteflow: cannot read {}: {err}", opt.input.display());
      process::exit(1);
    }
  };

  let options = Options {
    optimize: opt.optimize,
    verbose: opt.verbose,
  };

  match byteflow::compile(&source, &options) {
    Ok(program) => print!("{program}"),
    Err(err) => {
      eprintln!("byteflow: {err}");
      process::exit(err.exit_code());
    }
  }
}
