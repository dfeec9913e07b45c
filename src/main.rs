fn main() {
    if let Err(err) = kobo_etl::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
