use anyhow::Context;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  let capture_args = dvr_capture::CaptureArgs::from_args(&args)?;
  dvr_capture::run(&capture_args).context("capture run")
}
