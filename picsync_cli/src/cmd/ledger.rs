use anyhow::Result;
use picsync_core::record::{OwnerKey, SyncRecord};
use picsync_service::PicsyncService;

pub async fn run_ledger(cmd: crate::LedgerCmd, service: &PicsyncService) -> Result<()> {
    match cmd {
        crate::LedgerCmd::Show { remote_id } => match service.ledger().get(&remote_id).await? {
            Some(record) => print_record(&record),
            None => println!("No record for remote id {remote_id}"),
        },
        crate::LedgerCmd::Find { target_key } => {
            match service.ledger().get_by_target_key(&target_key).await? {
                Some(record) => print_record(&record),
                None => println!("No record owns target key {target_key}"),
            }
        }
        crate::LedgerCmd::List { row, column } => {
            let owner = OwnerKey::new(row, column);
            let records = service.ledger().list_by_owner(&owner).await?;
            if records.is_empty() {
                println!("No records owned by {owner}");
            }
            for record in &records {
                print_record(record);
                println!();
            }
        }
    }
    Ok(())
}

fn print_record(record: &SyncRecord) {
    println!("remote id:    {}", record.remote_id);
    println!("folder:       {}", record.remote_folder_id);
    println!("owner:        {}", record.owner);
    println!("file name:    {}", record.file_name);
    println!("status:       {:?}", record.status);
    println!(
        "hash:         {}",
        record.content_hash.as_deref().unwrap_or("-")
    );
    println!(
        "target key:   {}",
        record.target_key.as_deref().unwrap_or("-")
    );
    println!(
        "ref:          {}",
        record.target_ref.as_deref().unwrap_or("-")
    );
    if let (Some(original), Some(stored)) = (record.original_size, record.stored_size) {
        println!("size:         {original} -> {stored} bytes");
    }
    if let Some(err) = &record.last_error {
        println!("last error:   {err}");
    }
    if let Some(at) = record.last_attempt_at {
        println!("last attempt: {at}");
    }
}
