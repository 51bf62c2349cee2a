//! 문서 수집 모듈
//!
//! 로컬 폴더를 순회해 인덱싱할 `Document`를 만듭니다.
//! .gitignore 패턴을 존중하고, 지원하는 확장자만 수집합니다.
//! 읽지 못한 파일은 경고로 모으고 나머지는 계속 진행합니다.

mod extract;

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;

use crate::error::{RagError, Result};
use crate::knowledge::Metadata;

pub use extract::{extract_html, FileKind};

// ============================================================================
// Types
// ============================================================================

/// 인덱싱 단위 문서 (읽은 뒤에는 변경하지 않음)
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// 소스 ID (파일 경로, PDF는 `<path>#page=<n>`)
    pub id: String,
    pub text: String,
    /// 항상 `file_name`, `file_path` 포함
    pub metadata: Metadata,
}

impl Document {
    pub fn file_name(&self) -> &str {
        self.metadata
            .get("file_name")
            .map(String::as_str)
            .unwrap_or(self.id.as_str())
    }
}

/// 로드 결과 (문서 + 건너뛴 파일 경고)
#[derive(Debug, Default)]
pub struct LoadedDocuments {
    pub documents: Vec<Document>,
    /// `RagError::IngestionWarning` 목록
    pub warnings: Vec<RagError>,
}

/// 문서 소스 트레이트
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// 모든 문서 로드
    ///
    /// 소스 자체를 읽을 수 없으면 에러, 개별 문서 실패는 `warnings`에 담깁니다.
    async fn load(&self) -> Result<LoadedDocuments>;

    /// 표시용 설명
    fn describe(&self) -> String;
}

// ============================================================================
// DirectorySource
// ============================================================================

/// 폴더 수집 설정
#[derive(Debug, Clone)]
pub struct DirectorySourceConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for DirectorySourceConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// 로컬 폴더 문서 소스
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    config: DirectorySourceConfig,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, DirectorySourceConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: DirectorySourceConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// 수집 대상 파일 목록 (경로순 정렬)
    fn collect_paths(&self, root: &Path) -> (Vec<PathBuf>, Vec<RagError>) {
        let mut paths = Vec::new();
        let mut warnings = Vec::new();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(root)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            if FileKind::from_path(path).is_none() {
                tracing::debug!("Skipping unsupported file: {:?}", path);
                continue;
            }

            if self.config.max_file_size > 0 {
                match entry.metadata() {
                    Ok(meta) if meta.len() > self.config.max_file_size => {
                        warnings.push(RagError::IngestionWarning {
                            path: path.to_path_buf(),
                            message: format!(
                                "file is larger than {} bytes ({} bytes)",
                                self.config.max_file_size,
                                meta.len()
                            ),
                        });
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warnings.push(RagError::IngestionWarning {
                            path: path.to_path_buf(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                }
            }

            paths.push(path.to_path_buf());
        }

        paths.sort();
        (paths, warnings)
    }

    /// 파일 하나를 문서(들)로 변환
    async fn load_file(&self, path: &Path) -> anyhow::Result<Vec<Document>> {
        let kind = FileKind::from_path(path)
            .ok_or_else(|| anyhow::anyhow!("Unsupported file type"))?;
        let base = base_metadata(path).await?;
        let path_str = path.to_string_lossy().to_string();

        match kind {
            FileKind::Text => {
                let text = extract::read_text(path).await?;
                Ok(vec![Document {
                    id: path_str,
                    text,
                    metadata: base,
                }])
            }
            FileKind::Html => {
                let html = extract::read_text(path).await?;
                let (title, text) = extract_html(&html);
                let mut metadata = base;
                if let Some(title) = title {
                    metadata.insert("title".to_string(), title);
                }
                Ok(vec![Document {
                    id: path_str,
                    text,
                    metadata,
                }])
            }
            FileKind::Pdf => {
                // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
                let owned = path.to_path_buf();
                let pages = tokio::task::spawn_blocking(move || extract::extract_pdf_pages(&owned))
                    .await
                    .context("PDF extraction task failed")??;

                Ok(pages
                    .into_iter()
                    .filter(|(_, text)| !text.is_empty())
                    .map(|(page, text)| {
                        let mut metadata = base.clone();
                        metadata.insert("page_label".to_string(), page.to_string());
                        Document {
                            id: format!("{}#page={}", path_str, page),
                            text,
                            metadata,
                        }
                    })
                    .collect())
            }
        }
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn load(&self) -> Result<LoadedDocuments> {
        let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
            RagError::configuration(
                format!("Cannot read document directory {:?}: {}", self.root, e),
                "Pass an existing folder with --dir.",
            )
        })?;

        if !root.is_dir() {
            return Err(RagError::configuration(
                format!("Not a directory: {:?}", root),
                "Pass a folder (not a file) with --dir.",
            ));
        }

        let (paths, mut warnings) = self.collect_paths(&root);
        let mut documents = Vec::new();

        for path in &paths {
            match self.load_file(path).await {
                Ok(docs) => {
                    let before = documents.len();
                    documents.extend(docs.into_iter().filter(|d| !d.text.trim().is_empty()));
                    if documents.len() == before {
                        tracing::debug!("No text in {:?}", path);
                    }
                }
                Err(e) => {
                    let warning = RagError::IngestionWarning {
                        path: path.clone(),
                        message: format!("{:#}", e),
                    };
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        tracing::info!(
            "Loaded {} documents from {} files in {:?} ({} skipped)",
            documents.len(),
            paths.len(),
            root,
            warnings.len()
        );

        Ok(LoadedDocuments {
            documents,
            warnings,
        })
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// 파일 공통 메타데이터
async fn base_metadata(path: &Path) -> anyhow::Result<Metadata> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to read metadata: {:?}", path))?;

    let mut metadata = Metadata::new();
    metadata.insert(
        "file_name".to_string(),
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    );
    metadata.insert("file_path".to_string(), path.to_string_lossy().to_string());
    metadata.insert("file_type".to_string(), extract::mime_type(path).to_string());
    metadata.insert("file_size".to_string(), meta.len().to_string());
    if let Ok(modified) = meta.modified() {
        let modified: DateTime<Utc> = modified.into();
        metadata.insert(
            "last_modified_date".to_string(),
            modified.format("%Y-%m-%d").to_string(),
        );
    }
    Ok(metadata)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_directory_sorted_with_metadata() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.md"), "# Beta\nSecond file").unwrap();
        std::fs::write(dir.path().join("a.txt"), "First file").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.rs"), "fn main() {}").unwrap();

        let loaded = DirectorySource::new(dir.path()).load().await.unwrap();
        let names: Vec<&str> = loaded.documents.iter().map(|d| d.file_name()).collect();

        assert_eq!(names, vec!["a.txt", "b.md", "c.rs"]);
        assert!(loaded.warnings.is_empty());

        let doc = &loaded.documents[1];
        assert_eq!(doc.metadata["file_type"], "text/markdown");
        assert!(doc.metadata["file_path"].ends_with("b.md"));
        assert_eq!(doc.metadata["file_size"], "18");
        assert!(doc.metadata.contains_key("last_modified_date"));
    }

    #[tokio::test]
    async fn test_unreadable_file_is_warning() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("good.md"), "Readable").unwrap();
        std::fs::write(dir.path().join("bad.txt"), [0xffu8, 0xfe, 0x80]).unwrap();

        let loaded = DirectorySource::new(dir.path()).load().await.unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.warnings.len(), 1);
        assert!(matches!(
            &loaded.warnings[0],
            RagError::IngestionWarning { path, .. } if path.ends_with("bad.txt")
        ));
    }

    #[tokio::test]
    async fn test_oversized_file_is_warning() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(64)).unwrap();

        let source = DirectorySource::with_config(
            dir.path(),
            DirectorySourceConfig {
                max_file_size: 16,
                ..Default::default()
            },
        );
        let loaded = source.load().await.unwrap();
        assert!(loaded.documents.is_empty());
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_gitignore_respected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "drafts/\n").unwrap();
        std::fs::create_dir(dir.path().join("drafts")).unwrap();
        std::fs::write(dir.path().join("drafts/skip.md"), "ignored").unwrap();
        std::fs::write(dir.path().join("keep.md"), "kept").unwrap();

        let loaded = DirectorySource::new(dir.path()).load().await.unwrap();
        let names: Vec<&str> = loaded.documents.iter().map(|d| d.file_name()).collect();
        assert_eq!(names, vec!["keep.md"]);
    }

    #[tokio::test]
    async fn test_html_document_has_title() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("page.html"),
            "<html><head><title>Page</title></head><body><p>Body text</p></body></html>",
        )
        .unwrap();

        let loaded = DirectorySource::new(dir.path()).load().await.unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.documents[0].metadata["title"], "Page");
        assert_eq!(loaded.documents[0].text, "Body text");
    }

    #[tokio::test]
    async fn test_missing_directory_is_configuration_error() {
        let err = DirectorySource::new("/definitely/not/here")
            .load()
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
