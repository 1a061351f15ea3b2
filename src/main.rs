fn main() -> std::process::ExitCode {
    freightcheck_lib::run()
}
