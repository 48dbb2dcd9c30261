//! Read API and configuration commands.

use std::net::SocketAddr;
use std::path::Path;
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::{db, server};

/// Serve the read-only HTTP API until Ctrl-C
pub fn cmd_serve(rt: &Runtime, db_path: &Path, addr: SocketAddr) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = db::init_db(&db::db_url(Some(db_path))).await?;
        println!("Serving {:?} on http://{}", db_path, addr);
        server::serve(pool, addr).await?;
        Ok::<_, anyhow::Error>(())
    })
}

/// Print the effective configuration, optionally writing it out
pub fn cmd_config(config: &Config, path: Option<&Path>, init: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);

    if init {
        match path {
            Some(path) => config::save_to(config, path)?,
            None => config::save(config)?,
        }
        println!();
        match path.map(Path::to_path_buf).or_else(config::config_path) {
            Some(path) => println!("Wrote {:?}", path),
            None => println!("Wrote config"),
        }
    }
    Ok(())
}
