use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use snvpair::calling::{
    fisher_exact_two_tailed, CompoundRecord, KnownVariants, PatientBitsetIndex, PositionRecord,
    StoredRecord,
};
use snvpair::genomics::{
    BamRecordSource, FastaReference, MinMappingQuality, RecordSource, TextAlignmentSource,
};
use snvpair::{
    AnnotationConfig, CallerConfig, Pipeline, PositionRecordStore, Rule, RuleTable, RunSummary,
    SampleRole, SignificanceConfig,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snvpair", about = "Paired control/test somatic and germline SNV caller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    /// BAM/SAM/CRAM read through htslib.
    Bam,
    /// Tab-delimited alignments with `@SQ` header lines.
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Call variants from a coordinate-sorted control and test alignment pair.
    Call {
        /// Reference FASTA with contigs in the alignments' dictionary order.
        #[arg(long)]
        reference: PathBuf,
        /// Control (normal) alignments.
        #[arg(long)]
        control: PathBuf,
        /// Test (tumour) alignments.
        #[arg(long)]
        test: PathBuf,
        /// Alignment file format.
        #[arg(long, value_enum, default_value_t = InputFormat::Bam)]
        format: InputFormat,
        /// Control coverage rule `min,max,count`; `*` as max makes a percentage rule. Repeatable.
        #[arg(long = "control-rule")]
        control_rules: Vec<Rule>,
        /// Test coverage rule `min,max,count`. Repeatable.
        #[arg(long = "test-rule")]
        test_rules: Vec<Rule>,
        /// Minimum base quality for quality-weighted evidence.
        #[arg(long, default_value_t = 10)]
        min_base_quality: u8,
        /// Keep duplicate-flagged reads.
        #[arg(long)]
        include_duplicates: bool,
        /// Reads below this mapping quality only reach the unfiltered tallies.
        #[arg(long)]
        min_mapq: Option<u8>,
        /// Significance worker threads.
        #[arg(long, default_value_t = 2)]
        workers: usize,
        /// Cohort germline sites: `contig position alt patients` per line, patients comma-separated.
        #[arg(long)]
        germline_index: Option<PathBuf>,
        /// This patient's slot in the germline index; its own bit is ignored by GERM.
        #[arg(long, requires = "germline_index")]
        patient: Option<usize>,
        /// Known variant ids: `contig position alt id` per line.
        #[arg(long)]
        known_variants: Option<PathBuf>,
        /// Prefix for generated record ids.
        #[arg(long)]
        id_prefix: Option<String>,
        /// Filter tags never to add (e.g. SBIASCOV). Repeatable.
        #[arg(long = "skip-filter")]
        skip_filters: Vec<String>,
        /// Output file (default: stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Two-tailed Fisher's exact test for a 2x2 table.
    Fisher {
        /// Control reference reads.
        a: u32,
        /// Control alt reads.
        b: u32,
        /// Test reference reads.
        c: u32,
        /// Test alt reads.
        d: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Call {
            reference,
            control,
            test,
            format,
            control_rules,
            test_rules,
            min_base_quality,
            include_duplicates,
            min_mapq,
            workers,
            germline_index,
            patient,
            known_variants,
            id_prefix,
            skip_filters,
            output,
        } => {
            let mut config = CallerConfig::default()
                .with_min_base_quality(min_base_quality)
                .with_duplicates(include_duplicates)
                .with_significance(SignificanceConfig::default().with_workers(workers));
            if !control_rules.is_empty() {
                let table = RuleTable::new(control_rules).context("invalid control rules")?;
                config = config.with_rules(SampleRole::Control, table);
            }
            if !test_rules.is_empty() {
                let table = RuleTable::new(test_rules).context("invalid test rules")?;
                config = config.with_rules(SampleRole::Test, table);
            }
            let mut annotation = AnnotationConfig::default().with_skipped(skip_filters);
            if let Some(patient) = patient {
                annotation = annotation.with_patient(patient);
            }
            config = config.with_annotation(annotation);
            if let Some(prefix) = id_prefix {
                config = config.with_mutation_id_prefix(prefix);
            }
            let config = config.validate().context("invalid configuration")?;

            let mut pipeline = Pipeline::new(config);
            if let Some(min_mapq) = min_mapq {
                let predicate = Arc::new(MinMappingQuality(min_mapq));
                pipeline = pipeline
                    .with_predicate(SampleRole::Control, predicate.clone())
                    .with_predicate(SampleRole::Test, predicate);
            }
            if let Some(path) = &germline_index {
                let index = PatientBitsetIndex::from_reader(open_text_file(path)?)
                    .with_context(|| format!("failed to load germline index {}", path.display()))?;
                if let Some(patient) = patient.filter(|&patient| patient >= index.patients()) {
                    warn!(patient, cohort = index.patients(), "patient is outside the germline cohort");
                }
                pipeline = pipeline.with_germline_index(Arc::new(index));
            }
            if let Some(path) = &known_variants {
                let known = KnownVariants::from_reader(open_text_file(path)?)
                    .with_context(|| format!("failed to load known variants {}", path.display()))?;
                pipeline = pipeline.with_known_variants(Arc::new(known));
            }

            let (records, summary) = match format {
                InputFormat::Bam => run_call(
                    &pipeline,
                    open_bam(&control)?,
                    open_bam(&test)?,
                    &reference,
                )?,
                InputFormat::Text => run_call(
                    &pipeline,
                    open_text(&control)?,
                    open_text(&test)?,
                    &reference,
                )?,
            };

            let sink: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    File::create(path)
                        .with_context(|| format!("failed to create {}", path.display()))?,
                ),
                None => Box::new(io::stdout().lock()),
            };
            write_records(BufWriter::new(sink), &records).context("failed to write records")?;
            report(&summary);
        }
        Commands::Fisher { a, b, c, d } => {
            println!("{:.6e}", fisher_exact_two_tailed(a, b, c, d));
        }
    }

    Ok(())
}

fn open_bam(path: &Path) -> Result<BamRecordSource> {
    BamRecordSource::from_path(path)
        .with_context(|| format!("failed to open alignments {}", path.display()))
}

fn open_text_file(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn open_text(path: &Path) -> Result<TextAlignmentSource<BufReader<File>>> {
    TextAlignmentSource::new(open_text_file(path)?)
        .with_context(|| format!("failed to read header of {}", path.display()))
}

fn run_call<S>(
    pipeline: &Pipeline,
    control: S,
    test: S,
    reference: &Path,
) -> Result<(PositionRecordStore, RunSummary)>
where
    S: RecordSource + Send,
{
    let file = File::open(reference)
        .with_context(|| format!("failed to open reference {}", reference.display()))?;
    let output = pipeline
        .run(control, test, FastaReference::new(BufReader::new(file)))
        .context("variant calling failed")?;
    Ok((output.records, output.summary))
}

fn write_records<W: Write>(mut out: W, records: &PositionRecordStore) -> io::Result<()> {
    writeln!(
        out,
        "#contig\tposition\tid\tref\talt\tcontrol_gt\ttest_gt\tclass\tfilter\tprobability\tcontrol\ttest\tflanking"
    )?;
    for entry in records.entries() {
        match entry {
            StoredRecord::Single(record) => write_record(&mut out, record)?,
            StoredRecord::Compound(record) => write_compound(&mut out, record)?,
        }
    }
    out.flush()
}

fn write_record<W: Write>(out: &mut W, record: &PositionRecord) -> io::Result<()> {
    let summary = |role| {
        record
            .summary(role)
            .map_or_else(|| ".".to_string(), ToString::to_string)
    };
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        record.contig,
        record.position(),
        record.id.as_deref().unwrap_or("."),
        record.reference,
        record.alt_display(),
        record.genotype_indices(SampleRole::Control),
        record.genotype_indices(SampleRole::Test),
        record
            .classification()
            .map_or_else(|| ".".to_string(), |class| class.to_string()),
        record.filter(),
        record
            .probability
            .map_or_else(|| ".".to_string(), |p| format!("{p:.6e}")),
        summary(SampleRole::Control),
        summary(SampleRole::Test),
        record.flanking.as_deref().unwrap_or("."),
    )
}

fn write_compound<W: Write>(out: &mut W, record: &CompoundRecord) -> io::Result<()> {
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t.\t{}\t{}\t.",
        record.contig,
        record.position(),
        record.id.as_deref().unwrap_or("."),
        record.reference,
        record.alt_display(),
        record.genotype_indices(SampleRole::Control),
        record.genotype_indices(SampleRole::Test),
        record
            .classification()
            .map_or_else(|| ".".to_string(), |class| class.to_string()),
        record.filter(),
        record.control,
        record.test,
    )
}

fn report(summary: &RunSummary) {
    eprintln!(
        "contigs={}\tcompound={}\tsomatic={}\tgermline={}\tunclassified={}\tpassing={}\tpeak_window={}",
        summary.cleaner.contigs,
        summary.compound,
        summary.somatic,
        summary.germline,
        summary.unclassified,
        summary.passing,
        summary.cleaner.peak_window,
    );
}
