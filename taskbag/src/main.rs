//! `taskbag` command-line entry point

fn main() {
    if let Err(e) = taskbag::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
