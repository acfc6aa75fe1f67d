//! One-shot file transfer and inventory commands.

use anyhow::{Context, Result};
use pterm_client::browser::Entry;
use pterm_client::host::Driver;
use pterm_client::{HostDirectory, HostRecord, StaticHosts, TransferClient};
use std::io::Write;
use std::path::Path;

use crate::session::Session;

pub fn hosts_command(hosts: &StaticHosts, json: bool) -> Result<()> {
    let records = hosts.hosts();
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No hosts configured. Add [[hosts]] entries to config.toml.");
        return Ok(());
    }
    for record in &records {
        println!("{}", host_line(record));
    }
    Ok(())
}

fn host_line(record: &HostRecord) -> String {
    let target = if record.user.is_empty() {
        format!("{}:{}", record.address, record.port)
    } else {
        format!("{}@{}:{}", record.user, record.address, record.port)
    };
    let driver = match record.driver {
        Driver::Ssh => "ssh",
        Driver::Telecom => "telecom",
    };
    let sftp = if record.sftp.enabled { " sftp" } else { "" };
    format!(
        "{:>4}  {:<16} {} ({}){}",
        record.id.0, record.name, target, driver, sftp
    )
}

fn entry_line(entry: &Entry) -> String {
    let kind = if entry.is_dir { 'd' } else { '-' };
    let name = if entry.is_dir {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    };
    format!("{}{:o} {:>12}  {}", kind, entry.mode & 0o777, entry.size, name)
}

fn transfer(session: &Session) -> &TransferClient {
    session.client.transfer()
}

pub async fn ls_command(session: &Session, host: &HostRecord, path: &str) -> Result<()> {
    let listing = transfer(session)
        .list(host.id, path)
        .await
        .with_context(|| format!("Failed to list {path} on {}", host.name))?;
    println!("{}:", listing.cwd);
    for entry in &listing.entries {
        println!("{}", entry_line(entry));
    }
    Ok(())
}

pub async fn cat_command(session: &Session, host: &HostRecord, path: &str) -> Result<()> {
    let data = transfer(session)
        .read(host.id, path)
        .await
        .with_context(|| format!("Failed to read {path} on {}", host.name))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

pub async fn upload_command(
    session: &Session,
    host: &HostRecord,
    file: &Path,
    dir: &str,
) -> Result<()> {
    let report = transfer(session)
        .upload_file(host.id, file, dir)
        .await
        .with_context(|| format!("Failed to upload {}", file.display()))?;
    println!(
        "Uploaded {} ({} bytes, {} chunks) to {}:{}",
        file.display(),
        report.bytes_sent,
        report.chunks,
        host.name,
        dir
    );
    Ok(())
}

pub async fn download_command(session: &Session, host: &HostRecord, path: &str) -> Result<()> {
    let local = transfer(session)
        .download(host.id, path)
        .await
        .with_context(|| format!("Failed to download {path} from {}", host.name))?;
    println!("Saved {} to {}", path, local.display());
    Ok(())
}

pub async fn mkdir_command(session: &Session, host: &HostRecord, path: &str) -> Result<()> {
    transfer(session)
        .mkdir(host.id, path)
        .await
        .with_context(|| format!("Failed to create {path} on {}", host.name))
}

pub async fn rm_command(session: &Session, host: &HostRecord, path: &str) -> Result<()> {
    transfer(session)
        .remove(host.id, path)
        .await
        .with_context(|| format!("Failed to remove {path} on {}", host.name))
}

pub async fn mv_command(session: &Session, host: &HostRecord, from: &str, to: &str) -> Result<()> {
    transfer(session)
        .rename(host.id, from, to)
        .await
        .with_context(|| format!("Failed to move {from} to {to} on {}", host.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pterm_client::HostId;

    #[test]
    fn entry_lines() {
        let dir = Entry {
            name: "etc".into(),
            path: "/etc".into(),
            is_dir: true,
            size: 4096,
            mode: 0o40755,
            mod_unix: 0,
        };
        assert_eq!(entry_line(&dir), "d755         4096  etc/");
        let file = Entry {
            name: "notes.txt".into(),
            path: "/notes.txt".into(),
            is_dir: false,
            size: 12,
            mode: 0o100644,
            mod_unix: 0,
        };
        assert_eq!(entry_line(&file), "-644           12  notes.txt");
    }

    #[test]
    fn host_lines() {
        let record = HostRecord {
            id: HostId(3),
            name: "NAS".into(),
            address: "10.0.0.2".into(),
            port: 2222,
            user: "files".into(),
            driver: Default::default(),
            auth: Default::default(),
            sftp: Default::default(),
        };
        let line = host_line(&record);
        assert!(line.contains("NAS"));
        assert!(line.contains("files@10.0.0.2:2222"));
        assert!(line.contains("(ssh)"));
        assert!(!line.contains("sftp"));
    }
}
