//! CLI 모듈
//!
//! ragcheck CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::collector::{CollectionStats, CollectorConfig, FileCollector};
use crate::config::{RagConfig, RerankerKind, RetrieverKind};
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::evaluation::{
    chunking_grid, embedding_variants, evaluate_rag, evaluate_retrieval, load_questions,
    run_sweep, GroundingEvaluator, SweepReport, SweepVariant,
};
use crate::knowledge::{create_chunker, reconcile_registry, DocumentRegistry, Indexer, VectorIndex};
use crate::pipeline::RagPipeline;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "ragcheck")]
#[command(version, about = "로컬 RAG 검색 + 근거성 평가 도구", long_about = None)]
pub struct Cli {
    /// 설정 파일 (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 데이터 디렉토리 (설정 파일 값보다 우선)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 또는 폴더를 인덱스에 추가
    Ingest {
        /// 수집할 파일 또는 폴더 경로 (폴더는 재귀)
        path: PathBuf,

        /// PDF 파일 건너뛰기
        #[arg(long)]
        skip_pdfs: bool,
    },

    /// 질문 검색 (+ 답변 생성)
    Query {
        /// 질문
        query: String,

        #[command(flatten)]
        retrieval: RetrievalArgs,

        /// 답변 생성 없이 검색만
        #[arg(long)]
        no_generate: bool,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 평가 실행
    Eval {
        #[command(subcommand)]
        command: EvalCommands,
    },

    /// 수집된 문서 목록
    List,

    /// 상태 확인
    Status,

    /// 인덱스와 문서 기록 전체 삭제
    Reset {
        /// 확인 없이 삭제
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum EvalCommands {
    /// precision@k / recall@k / MRR
    Retrieval {
        #[command(flatten)]
        eval: EvalArgs,
    },

    /// 답변 생성 후 키워드 / 인용 / 근거성 평가
    Rag {
        #[command(flatten)]
        eval: EvalArgs,

        /// 문장 근거 임계값 (설정 파일 값보다 우선)
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// 청킹 전략별 검색 평가 비교 (메모리 인덱스)
    Sweep {
        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// 임베딩 모델별 검색 평가 비교 (메모리 인덱스)
    Benchmark {
        #[command(flatten)]
        sweep: SweepArgs,

        /// 비교할 모델 (쉼표 구분, `모델=차원` 형식으로 차원 지정)
        #[arg(short, long, value_delimiter = ',', required = true)]
        models: Vec<String>,
    },
}

/// 검색 구성 덮어쓰기
#[derive(Args, Clone, Default)]
pub struct RetrievalArgs {
    /// 결과 개수
    #[arg(short, long)]
    pub k: Option<usize>,

    /// 검색기 종류
    #[arg(long, value_enum)]
    pub retriever: Option<RetrieverKind>,

    /// 재정렬기 종류
    #[arg(long, value_enum)]
    pub reranker: Option<RerankerKind>,
}

#[derive(Args)]
pub struct EvalArgs {
    /// 질문 JSON 파일
    #[arg(short, long)]
    pub questions: PathBuf,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,

    /// 결과 JSON 저장 경로 (없으면 요약만 출력)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// 구성 비교 옵션
#[derive(Args)]
pub struct SweepArgs {
    /// 코퍼스 파일 또는 폴더
    #[arg(long)]
    pub corpus: PathBuf,

    /// 질문 JSON 파일
    #[arg(short, long)]
    pub questions: PathBuf,

    /// 결과 개수
    #[arg(short, long)]
    pub k: Option<usize>,

    /// 결과 JSON 저장 경로
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::load_or_default(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }

    match cli.command {
        Commands::Ingest { path, skip_pdfs } => cmd_ingest(&config, &path, skip_pdfs).await,
        Commands::Query {
            query,
            retrieval,
            no_generate,
            json,
        } => cmd_query(config, &query, retrieval, no_generate, json).await,
        Commands::Eval { command } => match command {
            EvalCommands::Retrieval { eval } => cmd_eval_retrieval(config, eval).await,
            EvalCommands::Rag { eval, threshold } => cmd_eval_rag(config, eval, threshold).await,
            EvalCommands::Sweep { sweep } => {
                let variants = chunking_grid(&config);
                cmd_eval_sweep(&config, sweep, variants).await
            }
            EvalCommands::Benchmark { sweep, models } => {
                let variants = embedding_variants(&config, &models)?;
                cmd_eval_sweep(&config, sweep, variants).await
            }
        },
        Commands::List => cmd_list(&config),
        Commands::Status => cmd_status(&config),
        Commands::Reset { yes } => cmd_reset(&config, yes),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
///
/// 기존 인덱스를 읽고, 새 문서를 추가한 뒤 파일 쌍으로 저장합니다.
/// 저장이 끝난 뒤에만 문서 기록을 남깁니다.
async fn cmd_ingest(config: &RagConfig, path: &Path, skip_pdfs: bool) -> Result<()> {
    let collector = FileCollector::new(CollectorConfig {
        skip_pdfs,
        ..Default::default()
    });

    let files = collector.collect(path)?;
    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!("    텍스트: {}, PDF: {}", stats.text_files, stats.pdf_files);
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    std::fs::create_dir_all(config.data_dir()).context("데이터 디렉토리 생성 실패")?;

    let index = Arc::new(open_index(config)?);
    let registry = Arc::new(
        DocumentRegistry::open(&config.registry_path()).context("문서 레지스트리 열기 실패")?,
    );

    // 인덱스 파일 쌍 기준으로 기록 정리
    let reconciled = reconcile_registry(&index, &registry).context("문서 기록 정리 실패")?;
    if !reconciled.is_clean() {
        println!(
            "[!] 문서 기록 정리: 삭제 {}, 복구 {}",
            reconciled.removed.len(),
            reconciled.restored.len()
        );
    }

    let embedder = create_embedder(&config.embedding)?;
    let indexer = Indexer::new(embedder, index.clone(), create_chunker(&config.chunking))
        .with_registry(registry);

    let summary = indexer.ingest_files(&files).await;

    for report in &summary.reports {
        if report.skipped {
            println!("  [-] {} (이미 수집됨)", report.source);
        } else {
            println!("  [+] {} ({} 청크)", report.source, report.num_chunks);
        }
    }
    for (path, reason) in &summary.failures {
        println!("  [!] {}: {}", path.display(), truncate_text(reason, 200));
    }

    indexer
        .commit(&summary, &config.index_path(), &config.metadata_path())
        .context("인덱스 저장 실패")?;

    println!();
    println!(
        "[OK] 완료: 추가 {}, 건너뜀 {}, 실패 {} (총 {} 청크)",
        summary.indexed_documents(),
        summary.skipped_documents(),
        summary.failures.len(),
        summary.total_chunks()
    );

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    mut config: RagConfig,
    query: &str,
    args: RetrievalArgs,
    no_generate: bool,
    json: bool,
) -> Result<()> {
    if no_generate {
        config.generation.enabled = false;
    }
    let default_k = config.retrieval.top_k;
    let k = apply_retrieval_args(&mut config, &args, default_k);
    let pipeline = build_pipeline(&config)?;

    if !json {
        println!("[*] 검색 중: \"{}\" ({}, k={})", query, pipeline.retriever_name(), k);
    }

    let response = pipeline.answer_query(query, k).await.context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.chunks.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", response.chunks.len());

    for (i, scored) in response.chunks.iter().enumerate() {
        let page = scored
            .chunk
            .metadata
            .page
            .map(|p| format!(" (p. {})", p))
            .unwrap_or_default();

        println!(
            "{}. [{}] [점수: {:.4}] {}{}",
            i + 1,
            scored.source.label(),
            scored.score,
            scored.chunk.source(),
            page
        );
        println!("   내용: {}", truncate_text(&scored.chunk.text, 200));
        println!();
    }

    println!("[*] 출처: {}", response.distinct_sources.join(", "));

    if let Some(answer) = &response.answer {
        println!();
        println!("[OK] 답변:");
        println!("{}", answer.trim());
    }

    Ok(())
}

/// 검색 평가 명령어 (eval retrieval)
async fn cmd_eval_retrieval(mut config: RagConfig, args: EvalArgs) -> Result<()> {
    config.generation.enabled = false;
    let default_k = config.evaluation.retrieval_k;
    let k = apply_retrieval_args(&mut config, &args.retrieval, default_k);
    let pipeline = build_pipeline(&config)?;
    let questions = load_questions(&args.questions)?;

    println!(
        "[*] 검색 평가: {} 질문 ({}, k={})",
        questions.len(),
        pipeline.retriever_name(),
        k
    );

    let report = evaluate_retrieval(&pipeline, &questions, k).await;
    let summary = &report.summary;

    println!();
    println!("  평가된 질문   : {}/{}", summary.evaluated, summary.questions);
    println!("  precision@k   : {:.4}", summary.mean_precision);
    println!("  recall@k      : {:.4}", summary.mean_recall);
    println!("  MRR           : {:.4}", summary.mrr);
    println!("  top-1 정확도  : {:.4}", summary.top1_accuracy);

    print_failures(report.failures.iter().map(|f| (f.id.as_str(), f.reason.as_str())));
    write_report(args.output.as_deref(), &report)
}

/// RAG 평가 명령어 (eval rag)
async fn cmd_eval_rag(mut config: RagConfig, args: EvalArgs, threshold: Option<f32>) -> Result<()> {
    if let Some(threshold) = threshold {
        config.evaluation.grounding_threshold = threshold;
    }
    let default_k = config.evaluation.rag_k;
    let k = apply_retrieval_args(&mut config, &args.retrieval, default_k);
    let evaluator = GroundingEvaluator::new(config.evaluation.grounding_threshold)?;
    let pipeline = build_pipeline(&config)?;
    let questions = load_questions(&args.questions)?;

    if !pipeline.has_generator() {
        println!("[!] 답변 생성이 비활성화되어 있어 근거성 지표는 계산되지 않습니다.");
    }

    println!(
        "[*] RAG 평가: {} 질문 ({}, 재정렬: {}, k={})",
        questions.len(),
        pipeline.retriever_name(),
        if pipeline.has_reranker() { "사용" } else { "미사용" },
        k
    );

    let report = evaluate_rag(&pipeline, &questions, k, &evaluator).await;
    let summary = &report.summary;
    let grounding = &summary.grounding;

    println!();
    println!("  답변된 질문     : {}/{}", summary.answered, summary.questions);
    println!("  인용률          : {}", format_rate(summary.citation_rate));
    println!("  키워드 커버리지 : {}", format_rate(summary.keyword_coverage));
    println!("  컨텍스트 겹침   : {}", format_rate(summary.context_overlap));
    println!("  문장 근거율     : {}", format_rate(grounding.grounding_rate));
    println!("  환각률          : {}", format_rate(grounding.hallucination_rate));

    if !grounding.integrity_violations.is_empty() {
        println!(
            "  [!] 근거 없는 답변: {}",
            grounding.integrity_violations.join(", ")
        );
    }

    print_failures(report.failures.iter().map(|f| (f.id.as_str(), f.reason.as_str())));
    write_report(args.output.as_deref(), &report)
}

/// 구성 비교 명령어 (eval sweep / eval benchmark)
async fn cmd_eval_sweep(
    config: &RagConfig,
    args: SweepArgs,
    variants: Vec<SweepVariant>,
) -> Result<()> {
    let k = args.k.unwrap_or(config.evaluation.retrieval_k);
    let questions = load_questions(&args.questions)?;
    let files = FileCollector::with_defaults().collect(&args.corpus)?;
    if files.is_empty() {
        bail!("코퍼스에 수집할 파일이 없습니다: {}", args.corpus.display());
    }

    println!(
        "[*] 구성 비교: {} 구성, {} 파일, {} 질문 (k={})",
        variants.len(),
        files.len(),
        questions.len(),
        k
    );

    let report = run_sweep(&variants, &files, &questions, k).await;
    print_sweep(&report);

    print_failures(report.failures.iter().map(|f| (f.name.as_str(), f.reason.as_str())));
    write_report(args.output.as_deref(), &report)
}

fn print_sweep(report: &SweepReport) {
    println!();
    println!(
        "  {:<32} {:>7} {:>8} {:>8} {:>8} {:>8}",
        "구성", "청크", "P@k", "R@k", "MRR", "Top-1"
    );
    for row in &report.rows {
        let s = &row.summary;
        println!(
            "  {:<32} {:>7} {:>8.4} {:>8.4} {:>8.4} {:>8.4}",
            truncate_text(&row.name, 32),
            row.num_chunks,
            s.mean_precision,
            s.mean_recall,
            s.mrr,
            s.top1_accuracy
        );
    }

    if let Some(best) = report.best() {
        println!();
        println!("[OK] 최고 MRR: {} ({:.4})", best.name, best.summary.mrr);
    }
}

/// 목록 명령어 (list)
fn cmd_list(config: &RagConfig) -> Result<()> {
    let registry =
        DocumentRegistry::open(&config.registry_path()).context("문서 레지스트리 열기 실패")?;
    let records = registry.list().context("문서 목록 조회 실패")?;

    if records.is_empty() {
        println!("[!] 수집된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 수집된 문서 ({} 건):\n", records.len());

    for record in records {
        println!("  {:<24} {}", truncate_text(&record.document_id, 24), record.source);
        println!(
            "  {:<24} {} | {} 청크",
            "",
            record.ingested_at.format("%Y-%m-%d %H:%M"),
            record.num_chunks
        );
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("ragcheck v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir().display());
    println!(
        "[*] 검색기: {:?}, 재정렬: {:?}, top_k: {}",
        config.retrieval.retriever, config.retrieval.reranker, config.retrieval.top_k
    );
    println!(
        "[*] 임베딩: {:?} {} (dim={})",
        config.embedding.provider, config.embedding.model, config.embedding.dimension
    );

    match open_index(config) {
        Ok(index) => println!("[OK] 벡터 인덱스: {} 청크", index.size()?),
        Err(e) => println!("[!] 벡터 인덱스 열기 실패: {:#}", e),
    }

    match DocumentRegistry::open(&config.registry_path()).and_then(|r| r.stats()) {
        Ok(stats) => println!(
            "[OK] 수집된 문서: {} 건 ({} 청크)",
            stats.document_count, stats.total_chunks
        ),
        Err(e) => println!("[!] 문서 레지스트리 열기 실패: {:#}", e),
    }

    Ok(())
}

/// 리셋 명령어 (reset)
fn cmd_reset(config: &RagConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("인덱스와 문서 기록이 모두 삭제됩니다. 계속하려면 --yes를 지정하세요");
    }

    for path in [config.index_path(), config.metadata_path()] {
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("파일 삭제 실패: {}", path.display()))?;
        }
    }

    let cleared = if config.registry_path().exists() {
        DocumentRegistry::open(&config.registry_path())?.clear()?
    } else {
        0
    };

    println!("[OK] 인덱스 삭제됨 (문서 기록 {} 건)", cleared);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 저장된 인덱스 열기
///
/// 두 파일이 모두 없을 때만 빈 인덱스로 시작합니다.
/// 한쪽만 있으면 손상된 파일 쌍으로 보고 에러를 반환합니다.
fn open_index(config: &RagConfig) -> Result<VectorIndex> {
    let index = VectorIndex::new(config.embedding.dimension)?;
    let index_path = config.index_path();
    let metadata_path = config.metadata_path();

    if !index_path.exists() && !metadata_path.exists() {
        tracing::info!("No saved index at {:?}, starting empty", index_path);
        return Ok(index);
    }

    match index.load(&index_path, &metadata_path) {
        Ok(()) => Ok(index),
        Err(RagError::NotFound(path)) => Err(RagError::NotFound(path)).context(
            "인덱스 파일 쌍 중 하나가 없습니다. `ragcheck reset --yes` 후 다시 수집하세요",
        ),
        Err(e) => Err(e).context("인덱스 로드 실패"),
    }
}

fn build_pipeline(config: &RagConfig) -> Result<RagPipeline> {
    config.validate()?;
    let index = Arc::new(open_index(config)?);
    if index.is_empty()? {
        println!("[!] 인덱스가 비어 있습니다. 먼저 `ragcheck ingest`를 실행하세요.");
    }
    RagPipeline::from_config(config, index).context("파이프라인 구성 실패")
}

/// CLI 검색 옵션을 설정에 반영하고 사용할 k 반환
fn apply_retrieval_args(config: &mut RagConfig, args: &RetrievalArgs, default_k: usize) -> usize {
    if let Some(retriever) = args.retriever {
        config.retrieval.retriever = retriever;
    }
    if let Some(reranker) = args.reranker {
        config.retrieval.reranker = reranker;
    }
    args.k.unwrap_or(default_k)
}

fn print_failures<'a>(failures: impl Iterator<Item = (&'a str, &'a str)>) {
    let failures: Vec<_> = failures.collect();
    if failures.is_empty() {
        return;
    }

    println!();
    println!("[!] 실패 ({} 건):", failures.len());
    for (id, reason) in failures {
        println!("  {}: {}", id, truncate_text(reason, 160));
    }
}

fn write_report<T: Serialize>(output: Option<&Path>, report: &T) -> Result<()> {
    if let Some(path) = output {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(path, json)
            .with_context(|| format!("결과 저장 실패: {}", path.display()))?;
        println!();
        println!("[OK] 결과 저장: {}", path.display());
    }
    Ok(())
}

/// 비율 포맷팅 (정의되지 않으면 "n/a")
fn format_rate(rate: Option<f64>) -> String {
    rate.map(|r| format!("{:.4}", r))
        .unwrap_or_else(|| "n/a".to_string())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingProviderKind;
    use tempfile::TempDir;

    fn offline_config(dir: &TempDir) -> RagConfig {
        let mut config = RagConfig::default();
        config.data_dir = Some(dir.path().to_path_buf());
        config.embedding.provider = EmbeddingProviderKind::Hashing;
        config.embedding.dimension = 64;
        config.generation.enabled = false;
        config
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(Some(0.5)), "0.5000");
        assert_eq!(format_rate(None), "n/a");
    }

    #[test]
    fn test_parse_query_flags() {
        let cli = Cli::try_parse_from([
            "ragcheck", "--data-dir", "/tmp/rc", "query", "what treats pain", "-k", "3",
            "--retriever", "bm25", "--reranker", "term-overlap", "--no-generate",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/rc")));
        match cli.command {
            Commands::Query { query, retrieval, no_generate, .. } => {
                assert_eq!(query, "what treats pain");
                assert_eq!(retrieval.k, Some(3));
                assert_eq!(retrieval.retriever, Some(RetrieverKind::Bm25));
                assert_eq!(retrieval.reranker, Some(RerankerKind::TermOverlap));
                assert!(no_generate);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_apply_retrieval_args() {
        let mut config = RagConfig::default();
        let args = RetrievalArgs {
            k: None,
            retriever: Some(RetrieverKind::Dense),
            reranker: None,
        };
        assert_eq!(apply_retrieval_args(&mut config, &args, 7), 7);
        assert_eq!(config.retrieval.retriever, RetrieverKind::Dense);
        assert_eq!(config.retrieval.reranker, RerankerKind::None);
    }

    #[test]
    fn test_parse_eval_sweep_and_benchmark() {
        let cli = Cli::try_parse_from([
            "ragcheck", "eval", "benchmark", "--corpus", "corpus", "-q", "questions.json",
            "--models", "nomic-embed-text,mxbai-embed-large=1024", "-k", "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Eval { command: EvalCommands::Benchmark { sweep, models } } => {
                assert_eq!(sweep.corpus, PathBuf::from("corpus"));
                assert_eq!(sweep.k, Some(3));
                assert_eq!(models, vec!["nomic-embed-text", "mxbai-embed-large=1024"]);
            }
            _ => panic!("expected eval benchmark command"),
        }

        assert!(Cli::try_parse_from(["ragcheck", "eval", "sweep", "-q", "q.json"]).is_err());
        assert!(Cli::try_parse_from([
            "ragcheck", "eval", "benchmark", "--corpus", "c", "-q", "q.json",
        ])
        .is_err());
    }

    #[test]
    fn test_open_index_missing_files_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&offline_config(&dir)).unwrap();
        assert!(index.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_open_index_with_orphan_file_fails() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("aspirin.txt"), "Aspirin relieves pain and fever.").unwrap();

        let config = offline_config(&dir);
        cmd_ingest(&config, &docs, false).await.unwrap();

        std::fs::remove_file(config.metadata_path()).unwrap();
        assert!(open_index(&config).is_err());

        // 빈 인덱스로 덮어쓰지 않음
        assert!(cmd_ingest(&config, &docs, false).await.is_err());
        assert!(config.index_path().exists());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_document_retryable() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("aspirin.txt"), "Aspirin relieves pain and fever.").unwrap();

        let config = offline_config(&dir);
        cmd_ingest(&config, &docs, false).await.unwrap();

        // 임시 파일 자리를 막아 저장 실패 유도
        let blocker = dir.path().join("index.bin.tmp");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(docs.join("insulin.txt"), "Insulin regulates blood sugar.").unwrap();
        assert!(cmd_ingest(&config, &docs, false).await.is_err());

        let registry = DocumentRegistry::open(&config.registry_path()).unwrap();
        assert!(!registry.contains("insulin").unwrap());

        std::fs::remove_dir(&blocker).unwrap();
        cmd_ingest(&config, &docs, false).await.unwrap();

        assert!(registry.contains("insulin").unwrap());
        let mut ids: Vec<String> = open_index(&config)
            .unwrap()
            .chunks()
            .unwrap()
            .into_iter()
            .map(|c| c.document_id)
            .collect();
        ids.dedup();
        assert_eq!(ids, vec!["aspirin", "insulin"]);
    }

    #[tokio::test]
    async fn test_ingest_restores_missing_registry_records() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("aspirin.txt"), "Aspirin relieves pain and fever.").unwrap();

        let config = offline_config(&dir);
        cmd_ingest(&config, &docs, false).await.unwrap();

        let registry = DocumentRegistry::open(&config.registry_path()).unwrap();
        registry.delete("aspirin").unwrap();
        registry.register("ghost", "ghost.txt", 2).unwrap();

        // 인덱스에 있는 문서는 다시 추가되지 않음
        cmd_ingest(&config, &docs, false).await.unwrap();
        assert_eq!(open_index(&config).unwrap().size().unwrap(), 1);
        assert!(registry.contains("aspirin").unwrap());
        assert!(!registry.contains("ghost").unwrap());
    }

    #[tokio::test]
    async fn test_eval_sweep_writes_report() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(corpus.join("aspirin.txt"), "Aspirin relieves pain and fever.").unwrap();
        std::fs::write(corpus.join("insulin.txt"), "Insulin regulates blood sugar.").unwrap();
        let questions = dir.path().join("questions.json");
        std::fs::write(
            &questions,
            r#"[{"id": "q1", "question": "What relieves pain?", "relevant_docs": ["aspirin"]}]"#,
        )
        .unwrap();
        let output = dir.path().join("sweep.json");

        let config = offline_config(&dir);
        let args = SweepArgs {
            corpus,
            questions,
            k: Some(2),
            output: Some(output.clone()),
        };
        cmd_eval_sweep(&config, args, chunking_grid(&config)).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(json["k"], 2);
        assert_eq!(json["rows"].as_array().unwrap().len(), 5);
        assert_eq!(json["rows"][0]["name"], "fixed_500_100_dense_norank");

        // 디스크 인덱스는 만들지 않음
        assert!(!config.index_path().exists());
    }

    #[tokio::test]
    async fn test_ingest_then_reopen_and_reset() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("aspirin.txt"), "Aspirin relieves pain and fever.").unwrap();
        std::fs::write(docs.join("insulin.txt"), "Insulin regulates blood sugar.").unwrap();

        let config = offline_config(&dir);
        cmd_ingest(&config, &docs, false).await.unwrap();

        let index = open_index(&config).unwrap();
        assert_eq!(index.size().unwrap(), 2);
        let registry = DocumentRegistry::open(&config.registry_path()).unwrap();
        assert_eq!(registry.list().unwrap().len(), 2);

        // 다시 수집하면 건너뜀
        cmd_ingest(&config, &docs, false).await.unwrap();
        assert_eq!(open_index(&config).unwrap().size().unwrap(), 2);

        assert!(cmd_reset(&config, false).is_err());
        cmd_reset(&config, true).unwrap();
        assert!(!config.index_path().exists());
        assert!(registry.list().unwrap().is_empty());
    }
}
