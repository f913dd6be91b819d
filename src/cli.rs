use clap::{Parser, Subcommand};

const DEFAULT_CATALOG_FILE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/catalog.json");
const DEFAULT_GEOCODER_ENDPOINT: &str = "https://us1.locationiq.com/v1/search";

#[derive(Parser, Debug)]
#[command(name = "pricecompare-backend")]
#[command(about = "Procedure price search backend (geocoding, ranking, price statistics)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the search HTTP API over a catalog snapshot.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Catalog snapshot (categories, templates, providers, locations, prices).
    #[arg(long, default_value = DEFAULT_CATALOG_FILE)]
    pub catalog_file: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8788)]
    pub port: u16,

    /// Upstream geocoding endpoint. The credential comes from GEOCODER_API_KEY;
    /// without one the geocoder runs on its ZIP fallback table alone.
    #[arg(long, default_value = DEFAULT_GEOCODER_ENDPOINT)]
    pub geocoder_endpoint: String,

    /// Upstream geocoding timeout, seconds.
    #[arg(long, default_value_t = 5)]
    pub geocoder_timeout_secs: u64,
}
