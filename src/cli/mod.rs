//! CLI 모듈
//!
//! lokal-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{
    ConversationTurn, Pipeline, Session, SessionState, TurnError, TurnObserver, TurnOutcome,
};
use crate::config::{get_data_dir, ChunkStrategy, FallbackKind, RagConfig};
use crate::embedding::select_from_config;
use crate::error::{RagError, Result};
use crate::ingest::DirectorySource;
use crate::knowledge::{
    chunker_from_config, ensure_compatible, EmbeddingSpace, IndexManifest, Indexer,
    LanceVectorIndex, ScoredPassage, VectorIndex,
};
use crate::ollama::OllamaClient;

/// 검색 결과 미리보기 길이
const PREVIEW_CHARS: usize = 200;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "lokal-rag")]
#[command(version, about = "로컬 RAG 채팅 - Ollama + LanceDB", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// 모든 명령어 공통 옵션 (환경변수보다 우선)
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// JSON 설정 파일
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Ollama 서버 URL
    #[arg(long, global = true)]
    pub ollama_url: Option<String>,

    /// 답변 생성 모델
    #[arg(long, global = true)]
    pub llm_model: Option<String>,

    /// 임베딩 모델
    #[arg(long, global = true)]
    pub embed_model: Option<String>,

    /// 벡터 인덱스 경로
    #[arg(long, global = true)]
    pub index_path: Option<PathBuf>,

    /// Ollama 임베딩을 쓸 수 없을 때 대체 임베딩
    #[arg(long, global = true, value_enum)]
    pub fallback: Option<FallbackKind>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 폴더의 문서를 인덱싱
    Index {
        /// 인덱싱할 폴더 (재귀)
        #[arg(short, long)]
        dir: PathBuf,

        /// 컬렉션 이름
        #[arg(short, long)]
        collection: Option<String>,

        /// 청크 최대 문자 수
        #[arg(long)]
        chunk_size: Option<usize>,

        /// 청크 간 겹치는 문자 수
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Markdown 헤더 기준 청킹
        #[arg(long)]
        markdown: bool,
    },

    /// 대화형 질의 (exit / quit 으로 종료)
    Query {
        /// 검색할 청크 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 검색/생성 추적 정보 출력
        #[arg(long)]
        trace: bool,
    },

    /// 질문 한 번 하고 종료
    Ask {
        /// 질문
        question: String,

        /// 검색할 청크 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 검색/생성 추적 정보 출력
        #[arg(long)]
        trace: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.global)?;

    match cli.command {
        Commands::Index {
            dir,
            collection,
            chunk_size,
            chunk_overlap,
            markdown,
        } => {
            if let Some(collection) = collection {
                config.index.collection = collection;
            }
            if let Some(size) = chunk_size {
                config.chunking.chunk_size = size;
            }
            if let Some(overlap) = chunk_overlap {
                config.chunking.chunk_overlap = overlap;
            }
            if markdown {
                config.chunking.strategy = ChunkStrategy::Markdown;
            }
            validate(&config)?;
            cmd_index(&config, dir).await
        }
        Commands::Query { top_k, trace } => {
            apply_top_k(&mut config, top_k)?;
            validate(&config)?;
            cmd_query(&config, trace).await
        }
        Commands::Ask {
            question,
            top_k,
            trace,
        } => {
            apply_top_k(&mut config, top_k)?;
            validate(&config)?;
            cmd_ask(&config, &question, trace).await
        }
        Commands::Status => cmd_status(&config).await,
    }
}

/// 기본값 → 설정 파일 → 환경변수 → CLI 옵션
fn load_config(global: &GlobalArgs) -> Result<RagConfig> {
    let mut config = RagConfig::load(global.config.as_deref()).map_err(|e| {
        RagError::configuration(format!("{:#}", e), "Fix the config file passed with --config.")
    })?;

    if let Some(ref url) = global.ollama_url {
        config.ollama.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(ref model) = global.llm_model {
        config.ollama.llm_model = model.clone();
    }
    if let Some(ref model) = global.embed_model {
        config.ollama.embed_model = model.clone();
    }
    if let Some(ref path) = global.index_path {
        config.index.path = path.clone();
    }
    if let Some(fallback) = global.fallback {
        config.embedding.fallback = fallback;
    }

    Ok(config)
}

fn validate(config: &RagConfig) -> Result<()> {
    config
        .validate()
        .map_err(|e| RagError::configuration(format!("{:#}", e), "Check the command line options."))
}

fn apply_top_k(config: &mut RagConfig, top_k: Option<usize>) -> Result<()> {
    if let Some(k) = top_k {
        config.retrieval.top_k = NonZeroUsize::new(k).ok_or_else(|| {
            RagError::configuration("--top-k must be at least 1", "Pass --top-k 1 or more.")
        })?;
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱싱 명령어 (index)
///
/// 폴더를 읽어 청킹 → 임베딩 → 컬렉션 저장까지 수행합니다.
async fn cmd_index(config: &RagConfig, dir: PathBuf) -> Result<()> {
    let selected = select_from_config(config).await?;
    if let Some(warning) = selected.warning() {
        println!("[!] {}", warning);
    }
    let provider = selected.provider();
    println!(
        "[*] 임베딩: {} ({} 차원)",
        provider.name(),
        provider.dimension()
    );

    let index = LanceVectorIndex::create_or_open(
        &config.index.path,
        &config.index.collection,
        &EmbeddingSpace::of(provider.as_ref()),
    )
    .await?;
    let manifest = IndexManifest::open(&config.index.manifest_path())
        .context("Failed to open index manifest")?;

    let indexer = Indexer::new(chunker_from_config(&config.chunking))
        .with_batch_size(config.embedding.batch_size)
        .with_manifest(manifest);
    let source = DirectorySource::new(&dir);

    println!(
        "[*] 인덱싱 중: {} → 컬렉션 '{}'",
        dir.display(),
        config.index.collection
    );

    let report = indexer.build(&source, provider.as_ref(), &index).await?;

    println!();
    println!(
        "[OK] 문서 {} 건 로드 ({:.2}s)",
        report.documents,
        report.load_elapsed.as_secs_f64()
    );
    if report.documents_skipped > 0 {
        println!("[!] 읽지 못한 파일: {} 건", report.documents_skipped);
    }
    println!(
        "[OK] 청크 {} 개 (임베딩 {}, 변경 없음 {}, 삭제 {}) ({:.2}s)",
        report.chunks,
        report.embedded,
        report.unchanged,
        report.pruned,
        report.embed_store_elapsed.as_secs_f64()
    );
    println!("     인덱스: {}", index.path().display());

    Ok(())
}

/// 대화형 질의 명령어 (query)
async fn cmd_query(config: &RagConfig, trace: bool) -> Result<()> {
    let mut session = open_session(config).await?;
    let mut observer = ConsoleObserver::new(trace);

    println!("[*] 질문을 입력하세요 (종료: exit / quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        flush_stdout();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if is_exit_command(query) {
            break;
        }

        session.run_turn(query, &mut observer).await;
    }

    println!("[OK] 종료합니다.");
    Ok(())
}

/// 단일 질의 명령어 (ask)
async fn cmd_ask(config: &RagConfig, question: &str, trace: bool) -> Result<()> {
    let mut session = open_session(config).await?;
    let mut observer = ConsoleObserver::new(trace);

    // 에러 내용은 관찰자가 이미 출력함, 종료 코드만 실패로
    match session.run_turn(question, &mut observer).await {
        TurnOutcome::Failed => Err(RagError::GenerationUnavailable {
            message: "No answer was generated".to_string(),
            hint: "Start Ollama with `ollama serve`, then ask again.".to_string(),
        }),
        _ => Ok(()),
    }
}

async fn open_session(config: &RagConfig) -> Result<Session> {
    let (pipeline, selected) = Pipeline::open(config).await?;
    if let Some(warning) = selected.warning() {
        println!("[!] {}", warning);
    }
    println!(
        "[*] 컬렉션 '{}' | 임베딩 '{}' | 모델 '{}'",
        pipeline.retriever().collection(),
        pipeline.retriever().provider_name(),
        pipeline.synthesizer().backend().model()
    );

    // 백엔드가 꺼져 있어도 세션은 시작 (턴 단위로 복구)
    if let Err(e) = pipeline.probe_embedding().await {
        println!("[!] {}", e.user_message());
    }
    if let Err(e) = pipeline.probe_generation().await {
        println!("[!] {}", e.user_message());
    }

    Ok(Session::new(Arc::new(pipeline)))
}

/// 상태 명령어 (status)
///
/// 데이터 디렉토리, Ollama 상태, 임베딩 프로바이더, 컬렉션 통계를 확인합니다.
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("lokal-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!("[*] 인덱스 경로: {}", config.index.path.display());

    // Ollama 상태
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            for (label, model) in [
                ("답변 모델", &config.ollama.llm_model),
                ("임베딩 모델", &config.ollama.embed_model),
            ] {
                let status = client.probe(model).await;
                if status.is_ready() {
                    println!("[OK] {}: {} ({})", label, model, client.base_url());
                } else {
                    println!("[!] {}: {} 사용 불가", label, model);
                    if let Some(fix) = status.remediation() {
                        println!("    {}", fix);
                    }
                }
            }
        }
        Err(e) => println!("[!] Ollama 클라이언트 생성 실패: {:#}", e),
    }

    // 임베딩 프로바이더
    let active = match select_from_config(config).await {
        Ok(selected) => {
            let provider = selected.provider();
            println!(
                "[OK] 임베딩 프로바이더: {} ({} 차원)",
                provider.name(),
                provider.dimension()
            );
            if let Some(warning) = selected.warning() {
                println!("    {}", warning);
            }
            Some(provider)
        }
        Err(e) => {
            println!("[!] {}", e.user_message());
            None
        }
    };

    // 컬렉션
    match LanceVectorIndex::open(&config.index.path, &config.index.collection).await {
        Ok(index) => {
            match index.count().await {
                Ok(count) => println!(
                    "[OK] 컬렉션 '{}': {} 청크, 임베딩 {}",
                    config.index.collection,
                    count,
                    index.space()
                ),
                Err(e) => println!("[!] 청크 수 조회 실패: {:#}", e),
            }
            if let Some(provider) = &active {
                if let Err(e) = ensure_compatible(provider.as_ref(), &index) {
                    println!("[!] {}", e.user_message());
                }
            }
        }
        Err(e) => println!("[!] {}", e.user_message()),
    }

    // 매니페스트
    match IndexManifest::open_existing(&config.index.manifest_path()) {
        Ok(Some(manifest)) => match manifest.stats(&config.index.collection) {
            Ok(stats) => {
                println!(
                    "[OK] 매니페스트: 소스 {} 개, 청크 {} 개",
                    stats.source_count, stats.chunk_count
                );
                if let Some(at) = stats.last_indexed {
                    println!("     마지막 인덱싱: {}", at.format("%Y-%m-%d %H:%M"));
                }
            }
            Err(e) => tracing::debug!("Manifest stats failed: {:#}", e),
        },
        Ok(None) => println!("[!] 매니페스트 없음 (아직 인덱싱하지 않음)"),
        Err(e) => tracing::debug!("Manifest open failed: {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Console Observer
// ============================================================================

/// 턴 진행 상황을 터미널에 출력
struct ConsoleObserver {
    trace: bool,
    streaming: bool,
}

impl ConsoleObserver {
    fn new(trace: bool) -> Self {
        Self {
            trace,
            streaming: false,
        }
    }
}

impl TurnObserver for ConsoleObserver {
    fn on_state(&mut self, state: SessionState) {
        match state {
            SessionState::Retrieving => println!("[*] 검색 중..."),
            SessionState::Synthesizing | SessionState::DegradedSynthesizing => {
                println!("[*] 답변 생성 중...\n");
                self.streaming = false;
            }
            SessionState::Idle | SessionState::Failed => {}
        }
    }

    fn on_retrieved(&mut self, passages: &[ScoredPassage], elapsed: Duration) {
        println!(
            "[OK] 검색 완료: {} 건 ({:.2}s)",
            passages.len(),
            elapsed.as_secs_f64()
        );
        for (i, passage) in passages.iter().enumerate() {
            println!(
                "  {}. [점수: {:.3}] {}",
                i + 1,
                passage.score,
                passage.file_name()
            );
            println!("     {}", passage.preview(PREVIEW_CHARS));
        }
    }

    fn on_retrieval_failed(&mut self, error: &RagError) {
        println!("[!] {}", error.user_message());
        println!("[!] 문서 없이 답변합니다.");
    }

    fn on_fragment(&mut self, fragment: &str) -> ControlFlow<()> {
        self.streaming = true;
        print!("{}", fragment);
        flush_stdout();
        ControlFlow::Continue(())
    }

    fn on_turn(&mut self, turn: &ConversationTurn) {
        if self.streaming {
            println!();
        }

        match &turn.error {
            Some(TurnError::Interrupted { message }) => {
                println!("\n[!] 답변이 중단되었습니다: {}", message);
            }
            Some(TurnError::Unavailable { .. }) => {
                println!("[!] {}", turn.content);
            }
            None => {}
        }

        if let Some(timings) = turn.timings {
            println!();
            println!("[*] 답변 생성 시간: {:.2}s", timings.generation.as_secs_f64());
            println!("[*] 전체 시간: {:.2}s", timings.total.as_secs_f64());
        }

        if self.trace {
            println!("\n--- trace ---");
            for entry in &turn.safe_trace {
                println!("  [{:?}] {}", entry.phase, entry.message);
            }
            if let Some(ref debug) = turn.debug_trace {
                for line in debug.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn is_exit_command(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

// ============================================================================
// Tests
// ============================================================================
