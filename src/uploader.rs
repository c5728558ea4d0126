//! Upload orchestration: scan, resolve the destination, upload each file

use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::drive::{name_equals, RemoteStorage};
use crate::error::{DriveupError, Result};
use crate::mime;
use crate::scanner::{self, ScanRequest};

/// Everything one run needs to know
#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub scan: ScanRequest,
    /// Remote folder to upload into; `None` is the Drive root
    pub upload_folder: Option<String>,
    /// Create a per-run folder named after today's date
    pub create_dated_folder: bool,
    /// chrono format string for the per-run folder name
    pub dated_folder_format: String,
    /// Single-request uploads instead of resumable sessions
    pub direct_upload: bool,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub remote_id: String,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct FailedUpload {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a run
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    /// Remote folder the files went to (`None` for the root)
    pub destination: Option<String>,
    pub uploaded: Vec<UploadedFile>,
    pub failed: Vec<FailedUpload>,
}

impl UploadReport {
    pub fn total(&self) -> usize {
        self.uploaded.len() + self.failed.len()
    }
}

/// Uploads scanned files through an injected [`RemoteStorage`]
pub struct Uploader<S: RemoteStorage> {
    storage: S,
}

impl<S: RemoteStorage> Uploader<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Run a plan.
    ///
    /// A bad root or pattern aborts before anything remote happens, as does
    /// a failure resolving or creating the destination folder. Individual
    /// upload failures are recorded in the report and the run continues.
    pub async fn run(&self, plan: &UploadPlan) -> Result<UploadReport> {
        info!(
            "Getting files to process from {:?} with pattern {:?}",
            plan.scan.root, plan.scan.pattern
        );
        let files = scanner::scan(&plan.scan)?;

        let destination = self.resolve_destination(plan).await?;
        let mut report = UploadReport {
            destination: destination.clone(),
            ..Default::default()
        };

        for record in files {
            let path = record.into_path();
            let mime_type = mime::detect(&path);

            info!("Uploading {:?}", path);
            match self
                .storage
                .upload_file(&path, destination.as_deref(), &mime_type, plan.direct_upload)
                .await
            {
                Ok(remote_id) => report.uploaded.push(UploadedFile {
                    path,
                    remote_id,
                    mime_type,
                }),
                Err(e) => {
                    error!("Error while uploading {:?}: {}", path, e);
                    report.failed.push(FailedUpload {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "{} file(s) processed: {} uploaded, {} failed",
            report.total(),
            report.uploaded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Find the upload folder and create the dated folder if requested
    async fn resolve_destination(&self, plan: &UploadPlan) -> Result<Option<String>> {
        let mut parent = None;

        if let Some(name) = &plan.upload_folder {
            info!("Upload directory - {}", name);
            let folders = self.storage.list_folders(&name_equals(name)).await?;
            match folders.into_iter().next() {
                Some(folder) => {
                    info!("Using folder '{}' ({})", folder.name, folder.id);
                    parent = Some(folder.id);
                }
                None => warn!("Folder '{}' not found on Drive, uploading to the root", name),
            }
        }

        if plan.create_dated_folder {
            let name = dated_folder_name(&plan.dated_folder_format, chrono::Local::now())?;
            info!("Creating upload folder {}", name);
            parent = Some(self.storage.create_folder(&name, parent.as_deref()).await?);
        }

        Ok(parent)
    }
}

/// Format `now` as a folder name, rejecting bad or empty formats
pub fn dated_folder_name<Tz>(format: &str, now: chrono::DateTime<Tz>) -> Result<String>
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut name = String::new();
    write!(name, "{}", now.format(format))
        .map_err(|_| DriveupError::Config(format!("Invalid dated folder format: {:?}", format)))?;

    if name.trim().is_empty() {
        return Err(DriveupError::Config(format!(
            "Dated folder format {:?} produces an empty name",
            format
        )));
    }
    Ok(name)
}
