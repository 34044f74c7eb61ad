fn main() -> std::process::ExitCode {
    studyflow_focus::run()
}
