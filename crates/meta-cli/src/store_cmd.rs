//! `meta store`: inspect the content-addressed artifact store.

use meta_core::context::Context;
use meta_core::error::{Error, Result};
use meta_core::store::Store;

use crate::cli::StoreAction;

pub fn run(ctx: &mut Context, action: StoreAction) -> Result<()> {
    let store = Store::new(ctx.store_dir());
    match action {
        StoreAction::Query { hash } => {
            let metadata = store
                .query(&hash)
                .ok_or_else(|| Error::CacheMiss { key: hash.clone() })?;
            println!("store entry {hash}:");
            println!("  component: {}", metadata.component);
            println!("  inputs_digest: {}", metadata.inputs_digest);
            println!("  created_at: {}", metadata.created_at);
            println!("  references: {:?}", metadata.references);
        }
        StoreAction::List => {
            println!("store entries:");
            for hash in store.all_hashes() {
                if let Some(metadata) = store.query(&hash) {
                    println!("  {hash} ({})", metadata.component);
                } else {
                    println!("  {hash}");
                }
            }
        }
    }
    Ok(())
}
