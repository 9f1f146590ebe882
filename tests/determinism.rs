mod common;

use std::collections::HashSet;

use blake3::hash;
use common::{render, run, Contig, SampleBuilder};
use snvpair::CallerConfig;

fn samples(contigs: &[Contig]) -> (SampleBuilder, SampleBuilder) {
    let (chr1, chr2) = (&contigs[0], &contigs[1]);
    let control = SampleBuilder::new("normal", contigs)
        .pileup(chr1, 40, 30, Some((b'G', 15)))
        .pileup(chr1, 90, 30, None)
        .pileup(chr2, 60, 30, None);
    let test = SampleBuilder::new("tumour", contigs)
        .pileup(chr1, 40, 30, Some((b'G', 15)))
        .pileup(chr1, 90, 30, Some((b'T', 8)))
        .pileup(chr2, 60, 30, Some((b'C', 4)));
    (control, test)
}

#[test]
fn pipeline_output_is_deterministic() {
    let contigs = [Contig::new("chr1", 150), Contig::new("chr2", 120)];

    let mut fingerprints = HashSet::new();
    for (run_index, sweep_interval) in [1usize, 2, 3, 50, 1_000].into_iter().enumerate() {
        let (control, test) = samples(&contigs);
        let config = CallerConfig::default()
            .with_sweep_interval(sweep_interval)
            .with_queue_capacity(1 + run_index * 3)
            .with_mutation_id_prefix("det");
        let output = run(config, &contigs, control, test).expect("run succeeds");
        assert!(!output.records.is_empty());

        let mut rendered = String::new();
        for record in output.records.iter() {
            rendered.push_str(&render(record));
            rendered.push_str(&format!("{:?}\n", record.probability));
        }
        fingerprints.insert(hash(rendered.as_bytes()));
    }

    assert_eq!(fingerprints.len(), 1, "outputs diverged across runs");
}
