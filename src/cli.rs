//! Command-line interface definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "driveup",
    version,
    about = "Upload files from a local directory to Google Drive",
    long_about = r#"
Driveup scans a directory for files whose name matches a pattern and
uploads each of them to Google Drive:
1. Files are selected by a regular expression that must match the whole
   file name ("report" does not match "report.csv", use "report\..*")
2. Uploads go to the Drive root or to an existing folder given with -u
3. With -f, a folder named after today's date is created for the run
"#
)]
pub struct Cli {
    /// Directory to read for files to upload
    #[arg(short = 'r', long = "read-dir", value_name = "DIR", required_unless_present = "logout")]
    pub read_dir: Option<PathBuf>,

    /// Regular expression the whole file name must match (default: all files)
    #[arg(short, long, value_name = "REGEX", default_value = "")]
    pub pattern: String,

    /// Folder on Google Drive to upload into (default: Drive root)
    #[arg(short = 'u', long = "upload-dir", value_name = "NAME")]
    pub upload_dir: Option<String>,

    /// Create a dated folder on Google Drive for this run's uploads
    #[arg(short = 'f', long = "create-folder")]
    pub create_folder: bool,

    /// Descend into subdirectories
    #[arg(short = 'R', long)]
    pub recursive: bool,

    /// Follow symbolic links to directories while scanning
    #[arg(long)]
    pub follow_links: bool,

    /// Use resumable uploads instead of single-request uploads
    #[arg(long)]
    pub resumable: bool,

    /// List the files that would be uploaded and exit
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Configuration file (default: ~/.driveup/config.json)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Google client_secrets.json to take OAuth credentials from
    #[arg(long, value_name = "FILE")]
    pub client_secrets: Option<PathBuf>,

    /// Revoke and forget the stored OAuth token, then exit
    #[arg(long, conflicts_with = "dry_run")]
    pub logout: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
