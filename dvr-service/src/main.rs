fn main() {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return;
  }

  let code = match dvr_service::run_host(&args) {
    Ok(code) => code,
    Err(e) => {
      eprintln!("dvr-service: {e:#}");
      dvr_service::host::EXIT_FAILED
    }
  };
  std::process::exit(code);
}
