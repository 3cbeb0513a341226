//! Process-wide choice of engine build.
//!
//! The first database opened without an explicit binding fixes the choice;
//! [`select`] may install a different build before that happens.

use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::error::{DuckDbError, DuckDbResult};
use crate::native::bundled::BundledBinding;
use crate::native::Binding;

static SELECTED: OnceLock<Arc<dyn Binding>> = OnceLock::new();

/// Install `binding` as the build used by [`crate::Database::create`].
///
/// Fails if a build has already been selected, explicitly or by opening a
/// database.
pub fn select(binding: Arc<dyn Binding>) -> DuckDbResult<()> {
    let name = binding.name().to_string();
    SELECTED.set(binding).map_err(|_| {
        DuckDbError::config(format!(
            "cannot select binding '{}': '{}' is already in use",
            name,
            selected().name()
        ))
    })?;
    info!(binding = %name, "Selected DuckDB binding");
    Ok(())
}

/// The build in use, falling back to the bundled engine.
pub fn selected() -> Arc<dyn Binding> {
    SELECTED
        .get_or_init(|| Arc::new(BundledBinding))
        .clone()
}
