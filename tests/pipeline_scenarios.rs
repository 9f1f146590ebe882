mod common;

use common::{assert_records_snapshot, run, Contig, SampleBuilder};
use snvpair::genomics::{
    AlignedRead, CigarOp, CigarOpKind, ContigInfo, ReadFlags, VecRecordSource,
};
use snvpair::{
    CallerConfig, Classification, Pipeline, PipelineError, Rule, RuleTable, SampleRole,
};
use test_case::test_case;

fn chr1() -> Contig {
    Contig::new("chr1", 120)
}

#[test]
fn balanced_test_only_variant_is_a_passing_somatic_call() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    assert_eq!(chr1.base(50), b'C');

    let control = SampleBuilder::new("normal", &contigs).pileup(chr1, 50, 30, None);
    let test = SampleBuilder::new("tumour", &contigs).pileup(chr1, 50, 30, Some((b'T', 5)));
    let rules = RuleTable::new(vec![
        Rule::new(0, Some(20), 3),
        Rule::new(21, Some(50), 5),
        Rule::new(51, None, 5),
    ])
    .expect("valid rules");
    let config = CallerConfig::default().with_rules(SampleRole::Test, rules);

    let output = run(config, &contigs, control, test).expect("run succeeds");
    assert_eq!(output.records.len(), 1);
    let record = output.records.iter().next().expect("one record");
    assert_eq!(record.classification(), Some(Classification::Somatic));
    assert!(record.passes(), "unexpected filters {}", record.filter());
    let probability = record.probability.expect("somatic call is scored");
    assert!((0.0..=1.0).contains(&probability));

    assert_records_snapshot("balanced_somatic.tsv", &output.records);

    let summary = &output.summary;
    assert_eq!(summary.somatic, 1);
    assert_eq!(summary.passing, 1);
    assert_eq!(summary.cleaner.contigs, 1);
    assert_eq!(summary.accumulators_created(), summary.accumulators_finalized());
}

#[test]
fn adjacent_somatic_changes_on_the_same_reads_become_one_compound_record() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    assert_eq!((chr1.base(50), chr1.base(51)), (b'C', b'G'));

    let control = SampleBuilder::new("normal", &contigs).pileup(chr1, 50, 30, None);
    let mut test = SampleBuilder::new("tumour", &contigs);
    for i in 0..30 {
        let substitutions: &[(u32, u8)] = if i < 10 { &[(50, b'T'), (51, b'A')] } else { &[] };
        test = test.read(chr1, 45 - (i % 15), i % 2 == 1, substitutions);
    }

    let output = run(CallerConfig::default(), &contigs, control, test).expect("run succeeds");
    assert_eq!(output.records.len(), 0, "constituent records are replaced");
    assert_eq!(output.records.compound_len(), 1);

    let compound = output.records.compounds().next().expect("compound record");
    assert_eq!(compound.position(), 50);
    assert_eq!(compound.end(), 51);
    assert_eq!(compound.reference, "CG");
    assert_eq!(compound.alts, vec!["TA".to_string()]);
    assert_eq!(compound.genotype_indices(SampleRole::Control), "0/0");
    assert_eq!(compound.genotype_indices(SampleRole::Test), "0/1");
    assert_eq!(compound.classification(), Some(Classification::Somatic));
    assert_eq!(compound.test.tally("TA").map(|t| t.count()), Some(10));
    assert!(compound.passes(), "unexpected filters {}", compound.filter());

    let summary = &output.summary;
    assert_eq!(summary.compound, 1);
    assert_eq!(summary.somatic, 1);
    assert_eq!(summary.passing, 1);
}

#[test]
fn raising_the_test_rule_above_alt_support_drops_the_call() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    let control = SampleBuilder::new("normal", &contigs).pileup(chr1, 50, 30, None);
    let test = SampleBuilder::new("tumour", &contigs).pileup(chr1, 50, 30, Some((b'T', 5)));
    let rules = RuleTable::new(vec![
        Rule::new(0, Some(20), 3),
        Rule::new(21, Some(50), 6),
        Rule::new(51, None, 10),
    ])
    .expect("valid rules");
    let config = CallerConfig::default().with_rules(SampleRole::Test, rules);

    let output = run(config, &contigs, control, test).expect("run succeeds");
    assert!(output.records.is_empty());
    assert_eq!(output.summary.cleaner.candidates, 0);
}

#[test]
fn alt_from_few_fragment_starts_is_flagged_for_novel_starts() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    let control = SampleBuilder::new("normal", &contigs).pileup(chr1, 50, 30, None);

    // Six alt reads but only three distinct (fragment start, strand) pairs.
    let alt = &[(50, b'T')];
    let mut test = SampleBuilder::new("tumour", &contigs)
        .read(chr1, 45, false, alt)
        .read(chr1, 45, false, alt)
        .read(chr1, 44, false, alt)
        .read(chr1, 44, false, alt)
        .read(chr1, 40, true, alt)
        .read(chr1, 40, true, alt);
    for i in 0..24u32 {
        test = test.read(chr1, 45 - (i % 15), i % 2 == 1, &[]);
    }

    let output = run(CallerConfig::default(), &contigs, control, test).expect("run succeeds");
    let record = output.records.iter().next().expect("one record");
    assert_eq!(record.classification(), Some(Classification::Somatic));
    assert_eq!(record.filter(), "NNS");
    assert_eq!(record.summary(SampleRole::Test).map(|s| s.tally(snvpair::Base::T).novel_starts), Some(3));
}

#[test]
fn single_strand_alt_is_flagged_for_strand_bias() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    let control = SampleBuilder::new("normal", &contigs).pileup(chr1, 50, 30, None);
    let mut test = SampleBuilder::new("tumour", &contigs);
    for i in 0..6u32 {
        test = test.read(chr1, 45 - i, false, &[(50, b'T')]);
    }
    for i in 0..24u32 {
        test = test.read(chr1, 45 - (i % 15), i % 2 == 1, &[]);
    }

    let output = run(CallerConfig::default(), &contigs, control, test).expect("run succeeds");
    let record = output.records.iter().next().expect("one record");
    assert_eq!(record.classification(), Some(Classification::Somatic));
    assert_eq!(record.filter(), "SBIASALT");
}

#[test]
fn shared_heterozygous_site_is_germline() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    let control = SampleBuilder::new("normal", &contigs).pileup(chr1, 50, 30, Some((b'T', 15)));
    let test = SampleBuilder::new("tumour", &contigs).pileup(chr1, 50, 30, Some((b'T', 15)));

    let output = run(CallerConfig::default(), &contigs, control, test).expect("run succeeds");
    let record = output.records.iter().next().expect("one record");
    assert_eq!(record.classification(), Some(Classification::Germline));
    assert_eq!(record.genotype_indices(SampleRole::Control), "0/1");
    assert_eq!(record.genotype_indices(SampleRole::Test), "0/1");
    assert!(record.passes(), "unexpected filters {}", record.filter());
    assert_eq!(output.summary.germline, 1);
    assert_eq!(output.summary.somatic, 0);
}

#[test_case(1, 1 ; "sweep after every read through a tiny queue")]
#[test_case(7, 4 ; "occasional sweeps")]
#[test_case(1_000, 10_000 ; "flush only at contig end")]
fn multi_contig_run_finalizes_every_accumulator(sweep_interval: usize, queue_capacity: usize) {
    let contigs = [Contig::new("chr1", 100), Contig::new("chr2", 100)];
    let (chr1, chr2) = (&contigs[0], &contigs[1]);
    let build = |prefix, alts: Option<(u8, u32)>, second: Option<(u8, u32)>| {
        SampleBuilder::new(prefix, &contigs)
            .pileup(chr1, 50, 30, alts)
            // Runs 14 bases past the end of chr1.
            .read(chr1, 85, false, &[])
            .pileup(chr2, 40, 30, second)
    };
    let control = build("normal", None, None);
    let test = build("tumour", Some((b'T', 6)), Some((b'A', 6)));
    let config = CallerConfig::default()
        .with_sweep_interval(sweep_interval)
        .with_queue_capacity(queue_capacity);

    let output = run(config, &contigs, control, test).expect("run succeeds");
    let positions: Vec<(u32, u32)> = output
        .records
        .iter()
        .map(|record| (record.key.ordinal, record.position()))
        .collect();
    assert_eq!(positions, vec![(0, 50), (1, 40)]);
    assert!(output
        .records
        .iter()
        .all(|record| record.classification() == Some(Classification::Somatic)));

    let summary = &output.summary;
    assert_eq!(summary.cleaner.contigs, 2);
    assert_eq!(summary.accumulators_created(), summary.accumulators_finalized());
    for role in SampleRole::BOTH {
        assert_eq!(summary.consumers[role.index()].beyond_contig, 14);
        assert_eq!(summary.consumers[role.index()].reads, 61);
    }
    assert!(summary.cleaner.peak_window > 0);
}

#[test]
fn reads_on_contigs_missing_from_the_reference_are_skipped() {
    let contigs = [Contig::new("chr1", 100), Contig::new("chr2", 100), Contig::new("chr3", 100)];
    let build = |prefix, alt| {
        SampleBuilder::new(prefix, &contigs)
            .pileup(&contigs[0], 50, 30, None)
            .pileup(&contigs[1], 50, 30, alt)
            .pileup(&contigs[2], 50, 30, None)
    };
    let control = build("normal", None);
    let test = build("tumour", Some((b'T', 10)));
    let reference = snvpair::genomics::VecReferenceProvider::new(vec![
        contigs[0].reference(),
        contigs[2].reference(),
    ]);

    let output = Pipeline::new(CallerConfig::default())
        .run(control.build(&contigs), test.build(&contigs), reference)
        .expect("run succeeds");
    assert!(output.records.is_empty());
    assert_eq!(output.summary.cleaner.contigs, 2);
    for role in SampleRole::BOTH {
        assert_eq!(output.summary.producers[role.index()].skipped_contig, 30);
        assert_eq!(output.summary.producers[role.index()].queued(), 60);
    }
}

#[test]
fn reads_after_the_last_reference_contig_are_counted() {
    let contigs = [Contig::new("chr1", 100), Contig::new("chr2", 100)];
    let build = |prefix| {
        SampleBuilder::new(prefix, &contigs)
            .pileup(&contigs[0], 50, 20, None)
            .pileup(&contigs[1], 50, 25, None)
    };
    let reference = snvpair::genomics::VecReferenceProvider::new(vec![contigs[0].reference()]);

    let output = Pipeline::new(CallerConfig::default())
        .run(build("normal").build(&contigs), build("tumour").build(&contigs), reference)
        .expect("run succeeds");
    assert_eq!(output.summary.cleaner.contigs, 1);
    for role in SampleRole::BOTH {
        let stats = &output.summary.producers[role.index()];
        assert_eq!(stats.records_read, 45);
        assert_eq!(stats.queued(), 20);
        assert_eq!(stats.skipped_contig, 25);
    }

    let empty = snvpair::genomics::VecReferenceProvider::new(Vec::new());
    let output = Pipeline::new(CallerConfig::default())
        .run(build("normal").build(&contigs), build("tumour").build(&contigs), empty)
        .expect("run succeeds");
    assert_eq!(output.summary.cleaner.contigs, 0);
    assert_eq!(output.summary.producers[SampleRole::Test.index()].skipped_contig, 45);
}

#[test]
fn unusable_reads_are_discarded_before_queueing() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    let mut reads = Vec::new();
    for (i, flags) in [
        ReadFlags { unmapped: true, ..ReadFlags::default() },
        ReadFlags { secondary: true, ..ReadFlags::default() },
        ReadFlags { qc_failed: true, ..ReadFlags::default() },
        ReadFlags { duplicate: true, ..ReadFlags::default() },
        ReadFlags::default(),
    ]
    .into_iter()
    .enumerate()
    {
        reads.push(
            AlignedRead::new(
                format!("r{i}"),
                "chr1",
                10,
                vec![CigarOp::new(CigarOpKind::Match, 4)],
                chr1.bases[9..13].to_vec(),
                vec![30u8; 4],
                false,
            )
            .with_flags(flags),
        );
    }
    let source = |reads| VecRecordSource::new(vec![chr1.info()], reads);

    let output = Pipeline::new(CallerConfig::default())
        .run(source(reads.clone()), source(reads.clone()), common::reference(&contigs))
        .expect("run succeeds");
    let stats = output.summary.producers[SampleRole::Control.index()];
    assert_eq!(stats.records_read, 5);
    assert_eq!(stats.discarded, 4);
    assert_eq!(stats.queued(), 1);

    let with_duplicates = Pipeline::new(CallerConfig::default().with_duplicates(true))
        .run(source(reads.clone()), source(reads), common::reference(&contigs))
        .expect("run succeeds");
    assert_eq!(with_duplicates.summary.producers[SampleRole::Test.index()].discarded, 3);
}

#[test]
fn unsorted_input_fails_the_run() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    let read = |name: &str, pos: u32| {
        AlignedRead::new(
            name,
            "chr1",
            pos,
            vec![CigarOp::new(CigarOpKind::Match, 4)],
            chr1.bases[pos as usize - 1..pos as usize + 3].to_vec(),
            vec![30u8; 4],
            false,
        )
    };
    let sorted = VecRecordSource::new(vec![chr1.info()], vec![read("a", 10), read("b", 20)]);
    let unsorted = VecRecordSource::new(vec![chr1.info()], vec![read("a", 20), read("b", 10)]);

    let error = Pipeline::new(CallerConfig::default())
        .run(sorted, unsorted, common::reference(&contigs))
        .expect_err("unsorted test input");
    match error {
        PipelineError::UnsortedInput { sample, position, .. } => {
            assert_eq!(sample, SampleRole::Test);
            assert_eq!(position, 10);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn differing_contig_dictionaries_are_rejected() {
    let contigs = [chr1()];
    let control = VecRecordSource::new(vec![ContigInfo::new("chr1", 120)], Vec::new());
    let test = VecRecordSource::new(vec![ContigInfo::new("chrX", 120)], Vec::new());

    let error = Pipeline::new(CallerConfig::default())
        .run(control, test, common::reference(&contigs))
        .expect_err("mismatched dictionaries");
    assert!(matches!(error, PipelineError::ContigDictionaryMismatch { index: 0 }));
}

#[test]
fn reference_length_must_match_the_dictionary() {
    let contigs = [chr1()];
    let source = || VecRecordSource::new(vec![ContigInfo::new("chr1", 150)], Vec::new());

    let error = Pipeline::new(CallerConfig::default())
        .run(source(), source(), common::reference(&contigs))
        .expect_err("length mismatch");
    assert!(matches!(
        error,
        PipelineError::ContigLengthMismatch { declared: 150, actual: 120, .. }
    ));
}

#[test]
fn invalid_configuration_is_rejected_before_reading() {
    let contigs = [chr1()];
    let control = SampleBuilder::new("normal", &contigs);
    let test = SampleBuilder::new("tumour", &contigs);
    let config = CallerConfig::default().with_queue_capacity(0);

    let error = run(config, &contigs, control, test).expect_err("zero queue capacity");
    assert!(matches!(error, PipelineError::Config(_)));
}

#[test]
fn empty_inputs_visit_every_reference_contig() {
    let contigs = [Contig::new("chr1", 50), Contig::new("chr2", 50)];
    let control = SampleBuilder::new("normal", &contigs);
    let test = SampleBuilder::new("tumour", &contigs);

    let output = run(CallerConfig::default(), &contigs, control, test).expect("run succeeds");
    assert!(output.records.is_empty());
    assert_eq!(output.summary.cleaner.contigs, 2);
    assert_eq!(output.summary.accumulators_created(), 0);
}

#[test]
fn predicate_failures_only_reach_the_unfiltered_tally() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    let control = SampleBuilder::new("normal", &contigs).pileup(chr1, 50, 30, None);
    let test = SampleBuilder::new("tumour", &contigs).pileup(chr1, 50, 30, Some((b'T', 10)));
    // Every test read carrying the alt starts at 36 or later; reject them.
    let predicate = std::sync::Arc::new(|read: &AlignedRead| read.pos < 36);

    let output = Pipeline::new(CallerConfig::default())
        .with_predicate(SampleRole::Test, predicate)
        .run(control.build(&contigs), test.build(&contigs), common::reference(&contigs))
        .expect("run succeeds");
    assert!(output.records.is_empty());
    let stats = output.summary.producers[SampleRole::Test.index()];
    assert_eq!(stats.passed_filter + stats.failed_filter, 30);
    assert!(stats.failed_filter >= 10);
}

#[test]
fn alt_evidence_in_the_control_is_flagged() {
    let contigs = [chr1()];
    let chr1 = &contigs[0];
    let control = || SampleBuilder::new("normal", &contigs).pileup(chr1, 50, 30, Some((b'T', 2)));
    let test = || SampleBuilder::new("tumour", &contigs).pileup(chr1, 50, 30, Some((b'T', 8)));

    let output = run(CallerConfig::default(), &contigs, control(), test()).expect("run succeeds");
    let record = output.records.iter().next().expect("one record");
    assert_eq!(record.classification(), Some(Classification::Somatic));
    assert_eq!(record.genotype_indices(SampleRole::Control), "0/0");
    assert_eq!(record.filter(), "MIN");

    // The same reads hidden behind the control predicate only count unfiltered.
    let hide_alt_reads = std::sync::Arc::new(|read: &AlignedRead| !matches!(&*read.name, "normal-0" | "normal-1"));
    let output = Pipeline::new(CallerConfig::default())
        .with_predicate(SampleRole::Control, hide_alt_reads)
        .run(control().build(&contigs), test().build(&contigs), common::reference(&contigs))
        .expect("run succeeds");
    let record = output.records.iter().next().expect("one record");
    assert_eq!(record.filter(), "MIUN");
}
