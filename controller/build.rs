fn main() {
    // Only the esp-idf build needs the linker/cfg plumbing from embuild;
    // host simulator builds must stay independent of the ESP toolchain.
    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }
}
