pub mod probe;
pub mod result;

pub mod prelude {
    pub use super::probe::*;
    pub use super::result::*;
}

use std::fmt::Write;

/// Render an error followed by its whole `source()` chain.
pub fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, "\n\nCaused by: {}", src);
        err = src;
    }
    s
}
