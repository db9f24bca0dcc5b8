use std::env;

// libpq is linked through diesel's postgres backend; homebrew keeps it off the default rpath
fn main() {
    println!("cargo:rerun-if-env-changed=LIBPQ_RPATH");
    if cfg!(target_os = "macos") {
        let libpq = env::var("LIBPQ_RPATH")
            .unwrap_or_else(|_| "/opt/homebrew/opt/postgresql@16/lib".to_string());
        println!("cargo:rustc-link-arg=-Wl,-rpath,{libpq}");
    }
}
