fn main() {
    // ESP-IDF link arguments are only needed for the target build; host
    // builds (tests, simulation) compile without the IDF toolchain.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
