fn main() {
    hsmpool_cli::run_cli();
}
