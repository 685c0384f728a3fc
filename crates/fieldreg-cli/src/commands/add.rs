use std::path::Path;

use crate::cli::{CustomerArgs, LocationArgs};
use crate::commands::common::{build_customer, open_store};
use crate::error::CliError;

pub async fn run_add(
    fields: &CustomerArgs,
    location: LocationArgs,
    db_path: &Path,
) -> Result<(), CliError> {
    let customer = build_customer(fields, location)?;

    let store = open_store(db_path).await?;
    let document = store.create(customer).await?;

    println!("{}", document.id);
    Ok(())
}
