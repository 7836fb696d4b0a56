fn main() {
    if let Err(err) = deferred_batch::run() {
        eprintln!("Application error: {err}");
    }
}
