use rand::distr::Alphanumeric;
use rand::Rng as _;

/// Generates a prefixed project id, e.g. `proj_3f8a1c9b2e7d4a6f`.
#[must_use]
pub fn new_project_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("proj_{suffix}")
}
