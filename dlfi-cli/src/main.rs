//! `dlfi`: a thin clap front end over `dlfi_core::Archive`, driving the
//! operations surface end to end from a shell. Every subcommand opens
//! the archive, performs one operation, and exits — there is no daemon or
//! long-lived session.

use clap::{Parser, Subcommand};
use dlfi_core::db::UpdateNodePatch;
use dlfi_core::path::NodeId;
use dlfi_core::{Archive, DlfiError};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "dlfi")]
#[command(about = "Local-first digital asset archive", long_about = None)]
struct Cli {
	/// Archive root directory (holds the `.dlfi/` state dir).
	#[arg(short = 'r', long, global = true, default_value = ".")]
	root: PathBuf,

	/// Passphrase to unlock an encrypted archive. Omit for a plain archive,
	/// or to be prompted by `encrypt enable`/`change-passphrase`.
	#[arg(short, long, global = true)]
	passphrase: Option<String>,

	/// Enable debug logging.
	#[arg(short = 'v', long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Create a VAULT at the given namespace path.
	Vault { path: String },

	/// Create a RECORD at the given namespace path.
	Record {
		path: String,
		/// Inline JSON object merged in as the record's metadata.
		#[arg(long, default_value = "{}")]
		metadata: String,
	},

	/// Show a node's summary (type, metadata, tags).
	Show { path: String },

	/// Replace a node's metadata object wholesale.
	SetMetadata {
		path: String,
		/// Inline JSON object.
		metadata: String,
	},

	/// Delete a node and its descendants.
	Delete { path: String },

	/// Add a tag to a node.
	Tag { path: String, value: String },

	/// Remove a tag from a node.
	Untag { path: String, value: String },

	/// Create a directed, labeled relationship between two nodes.
	Link {
		source: String,
		target: String,
		relation: String,
	},

	/// Remove a relationship between two nodes.
	Unlink {
		source: String,
		target: String,
		relation: String,
	},

	/// Ingest a local file and bind it to a RECORD.
	AppendFile {
		record_path: String,
		file: PathBuf,
		/// Display name stored alongside the binding; defaults to the file name.
		#[arg(long)]
		name: Option<String>,
	},

	/// Write a bound file's plaintext bytes back out to disk.
	OpenFile {
		hash: String,
		out: PathBuf,
	},

	/// Run a query and print matching nodes.
	Query { text: String },

	/// Suggest completions for a partially typed query.
	Autocomplete {
		text: String,
		/// Cursor offset into `text`; defaults to the end.
		#[arg(long)]
		cursor: Option<usize>,
	},

	/// Export the whole namespace as a static file tree.
	Export { out_dir: PathBuf },

	/// Reclaim tombstoned blobs and crash-recovery temp files.
	Vacuum,

	/// Encryption and key management.
	#[command(subcommand)]
	Encrypt(EncryptCommands),

	/// Change the partition size used for newly ingested blobs.
	SetPartitionSize { mb: u64 },
}

#[derive(Subcommand)]
enum EncryptCommands {
	/// Turn encryption on, re-encrypting every existing blob.
	Enable {
		#[arg(long)]
		passphrase: String,
	},
	/// Turn encryption off, decrypting every blob back to plaintext.
	Disable,
	/// Rotate the passphrase without re-encrypting ciphertext bodies.
	ChangePassphrase {
		#[arg(long)]
		old: String,
		#[arg(long)]
		new: String,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let log_level = if cli.verbose { "debug" } else { "info" };
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("dlfi_core={log_level},dlfi={log_level}")));
	tracing_subscriber::fmt().with_env_filter(env_filter).init();

	let mut archive = Archive::open(&cli.root, cli.passphrase.as_deref()).await?;
	let token = CancellationToken::new();

	match cli.command {
		Commands::Vault { path } => {
			let uuid = archive.create_vault(&path).await?;
			println!("created vault {path} ({uuid})");
		}
		Commands::Record { path, metadata } => {
			let value = serde_json::from_str(&metadata)?;
			let uuid = archive.create_record(&path, value).await?;
			println!("created record {path} ({uuid})");
		}
		Commands::Show { path } => {
			let uuid = resolve(&archive, &path).await?;
			let node = archive.node(uuid).await?;
			println!("{} ({:?})", node.path, node.node_type);
			println!("tags: {}", node.tags.join(", "));
			println!("metadata: {}", node.metadata);
		}
		Commands::SetMetadata { path, metadata } => {
			let uuid = resolve(&archive, &path).await?;
			let value = serde_json::from_str(&metadata)?;
			archive
				.update_node(
					uuid,
					UpdateNodePatch {
						metadata: Some(value),
						..Default::default()
					},
				)
				.await?;
			println!("updated metadata for {path}");
		}
		Commands::Delete { path } => {
			let uuid = resolve(&archive, &path).await?;
			let removed = archive.delete(uuid).await?;
			println!("deleted {} node(s)", removed.len());
		}
		Commands::Tag { path, value } => {
			let uuid = resolve(&archive, &path).await?;
			archive.add_tag(uuid, &value).await?;
			println!("tagged {path} with {value}");
		}
		Commands::Untag { path, value } => {
			let uuid = resolve(&archive, &path).await?;
			archive.remove_tag(uuid, &value).await?;
			println!("removed tag {value} from {path}");
		}
		Commands::Link { source, target, relation } => {
			let source_id = resolve(&archive, &source).await?;
			let target_id = resolve(&archive, &target).await?;
			archive.link(source_id, target_id, &relation).await?;
			println!("linked {source} --{relation}--> {target}");
		}
		Commands::Unlink { source, target, relation } => {
			let source_id = resolve(&archive, &source).await?;
			let target_id = resolve(&archive, &target).await?;
			archive.unlink(source_id, target_id, &relation, true).await?;
			println!("unlinked {source} --{relation}--> {target}");
		}
		Commands::AppendFile { record_path, file, name } => {
			let uuid = resolve(&archive, &record_path).await?;
			let display_name = name.unwrap_or_else(|| {
				file.file_name()
					.map(|n| n.to_string_lossy().into_owned())
					.unwrap_or_else(|| "file".to_string())
			});
			let reader = tokio::fs::File::open(&file).await?;
			archive.append_file(uuid, &display_name, reader).await?;
			println!("appended {display_name} to {record_path}");
		}
		Commands::OpenFile { hash, out } => {
			let bytes = archive.open_blob(&hash).await?;
			tokio::fs::write(&out, bytes).await?;
			println!("wrote {}", out.display());
		}
		Commands::Query { text } => {
			let results = archive.query(&text).await?;
			if results.is_empty() {
				println!("no matches");
			}
			for node in results {
				println!("{}\t{:?}", node.path, node.node_type);
			}
		}
		Commands::Autocomplete { text, cursor } => {
			let cursor = cursor.unwrap_or(text.len());
			let suggestions = archive.autocomplete(&text, cursor).await?;
			for s in suggestions {
				println!("{}\t{}", s.display, s.insert_text);
			}
		}
		Commands::Export { out_dir } => {
			let report = archive.export(&out_dir, &token).await?;
			println!(
				"wrote {} director{} and {} file(s)",
				report.directories_written,
				if report.directories_written == 1 { "y" } else { "ies" },
				report.files_written
			);
			for skipped in &report.skipped {
				println!("skipped {} ({}): {}", skipped.display_name, skipped.record_path, skipped.reason);
			}
		}
		Commands::Vacuum => {
			let report = archive.vacuum(&token).await?;
			println!(
				"reclaimed {} loose blob(s) and {} partitioned blob(s) ({} still pending a sealed partition), {} crash-recovery temp file(s) removed",
				report.loose_blobs_removed,
				report.partitioned_blobs_removed,
				report.partitioned_blobs_pending,
				report.incomplete_temp_files_removed
			);
		}
		Commands::Encrypt(cmd) => match cmd {
			EncryptCommands::Enable { passphrase } => {
				archive.set_encryption(Some(&passphrase), &token).await?;
				println!("encryption enabled");
			}
			EncryptCommands::Disable => {
				archive.set_encryption(None, &token).await?;
				println!("encryption disabled");
			}
			EncryptCommands::ChangePassphrase { old, new } => {
				archive.change_passphrase(&old, &new, &token).await?;
				println!("passphrase rotated");
			}
		},
		Commands::SetPartitionSize { mb } => {
			archive.set_partition_size(mb * 1024 * 1024).await?;
			println!("partition size set to {mb} MiB");
		}
	}

	Ok(())
}

async fn resolve(archive: &Archive, path: &str) -> Result<NodeId, DlfiError> {
	archive.resolve(path).await
}
