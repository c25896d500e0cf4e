use crate::db::Stores;
use crate::error::Error;
use crate::options::{OptionsData, OptionsUpdate};

/// The full option set: code-level defaults overlaid with the stored
/// overrides.
pub async fn get_options(stores: &Stores) -> Result<OptionsData, Error> {
  let update = stores.options.get().await?.unwrap_or_default();
  Ok(OptionsData::with_update(&update))
}

/// Merge the given overrides into the stored option entry and return the
/// resulting full option set.
pub async fn patch_options(
  stores: &Stores,
  patch: &OptionsUpdate,
) -> Result<OptionsData, Error> {
  let update = stores.options.patch(patch).await?;
  Ok(OptionsData::with_update(&update))
}
