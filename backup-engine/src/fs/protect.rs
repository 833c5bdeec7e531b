//! Output directory preparation.

use std::fs;
use std::path::Path;

const HTACCESS: &str = "Order deny,allow\nDeny from all\n";

/// Create the output directory and drop the deny-all marker plus an empty
/// index placeholder into it. Existing markers are left untouched.
pub fn secure_output_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;

    let htaccess = dir.join(".htaccess");
    if !htaccess.exists() {
        fs::write(&htaccess, HTACCESS)?;
        tracing::debug!("Wrote {}", htaccess.display());
    }

    let index = dir.join("index.html");
    if !index.exists() {
        fs::write(&index, b"")?;
    }

    Ok(())
}
