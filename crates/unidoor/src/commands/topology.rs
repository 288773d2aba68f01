//! `topology`: list the controller's door readers.

use tabled::Tabled;

use unidoor_core::{ControllerClient, Reader};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct ReaderRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Location")]
    location: String,
}

impl From<&Reader> for ReaderRow {
    fn from(r: &Reader) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            device_type: r.device_type.clone(),
            mac: r.mac.clone(),
            location: r.location.clone(),
        }
    }
}

pub async fn handle(mut client: ControllerClient, global: &GlobalOpts) -> Result<(), CliError> {
    util::connect(&mut client).await?;
    let topology = client.fetch_topology().await?;

    let out = output::render_list(
        &global.output,
        &topology.readers,
        |r| ReaderRow::from(r),
        |r| r.id.clone(),
    )?;
    output::print_output(&out, global.quiet);

    if matches!(global.output, OutputFormat::Table) && !global.quiet {
        eprintln!(
            "{} readers of {} devices",
            topology.readers.len(),
            topology.total_devices
        );
    }
    Ok(())
}
