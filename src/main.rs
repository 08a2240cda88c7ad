fn main() {
    if let Err(err) = datapulse::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
