use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Subcommand;
use rand::RngCore;
use toml_edit::{ArrayOfTables, DocumentMut, Item, Table};
use tracing::info;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the instance config file with local defaults if it doesn't exist
    Init,
    /// Print the active config file
    Show,
}

impl CmdConfig {
    pub fn run(self, config_file: PathBuf, local_data_dir: &Path) -> anyhow::Result<()> {
        match self {
            Self::Show => {
                let content = fs::read_to_string(&config_file)
                    .with_context(|| format!("could not read config file {config_file:?}"))?;
                print!("{content}");
                return Ok(());
            }
            Self::Init => {}
        }

        let mut doc = if config_file.exists() {
            fs::read_to_string(&config_file)?
        } else {
            fs::create_dir_all(config_file.parent().unwrap())?;
            "".to_owned()
        }
        .parse::<DocumentMut>()
        .context("could not parse config file")?;

        doc.entry("source")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .unwrap()
            .entry("base_url")
            .or_insert("https://drive.example.com/api".into());

        doc.entry("rows")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .unwrap()
            .entry("base_url")
            .or_insert("http://localhost:3000/api".into());

        let ledger_path = local_data_dir.join("ledger");
        let ledger = doc
            .entry("ledger")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .unwrap();
        ledger.entry("type").or_insert("redb".into());
        ledger
            .entry("path")
            .or_insert(ledger_path.to_str().unwrap().into());

        let objects_path = local_data_dir.join("objects");
        let target = doc
            .entry("target")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .unwrap();
        target.entry("type").or_insert("local".into());
        target
            .entry("base_path")
            .or_insert(objects_path.to_str().unwrap().into());

        doc.entry("sync")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .unwrap()
            .entry("target")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .unwrap()
            .entry("public_base_url")
            .or_insert(format!("file://{}", objects_path.display()).into());

        let server = doc
            .entry("server")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .unwrap();
        if !server.contains_key("webhook_secret") {
            info!("generating random webhook secret");
            let mut bytes = [0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            server.insert("webhook_secret", hex::encode(bytes).into());
        }

        // One sample watch so a sweep has something to do once the table
        // and column names are adjusted.
        if !doc.contains_key("watch") {
            let mut watch = Table::new();
            watch.insert("table", "products".into());
            watch.insert("column", "image_folder".into());
            let mut watches = ArrayOfTables::new();
            watches.push(watch);
            doc.insert("watch", Item::ArrayOfTables(watches));
        }

        info!("writing to config file {config_file:?}");

        let tmp_path = config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, config_file)?;
        Ok(())
    }
}
