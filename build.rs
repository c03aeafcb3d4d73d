fn main() {
    // Host builds (tests, fuzzing) carry no ESP-IDF environment.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
