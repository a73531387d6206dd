//! Command: print version information.

/// Print the aitools version to stdout.
pub fn run() {
    println!("aitools {}", crate::version());
}
