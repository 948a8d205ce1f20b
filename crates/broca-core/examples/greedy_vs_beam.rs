//! Greedy vs beam decoding example.
//!
//! Builds a small randomly initialized model over a toy vocabulary and
//! decodes the same source with both strategies. With random weights the
//! output is arbitrary but the mechanics are real: fixed-length greedy
//! output, beam hypotheses ranked by normalized score, caller-side EOS
//! trimming.
//!
//! Run with:
//! ```bash
//! cargo run -p broca-core --example greedy_vs_beam
//! ```

use broca_core::mask::padding_mask;
use broca_core::model::{ModelConfig, Translator};
use broca_core::search::{beam_search, greedy_decode, trim_at_eos, BeamConfig};
use broca_core::vocab::{Vocab, BOS, BOS_ID, EOS, EOS_ID};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

fn main() -> anyhow::Result<()> {
    let device = Device::Cpu;

    let mut vocab = Vocab::new();
    for word in ["the", "cat", "sat", "on", "mat", "a", "dog", "ran"] {
        vocab.add(word);
    }

    println!("Greedy vs Beam Decoding");
    println!("=======================\n");
    println!("Vocabulary: {:?}", vocab);

    let config = ModelConfig {
        src_vocab_size: vocab.len(),
        tgt_vocab_size: vocab.len(),
        d_model: 32,
        d_ff: 64,
        num_heads: 4,
        num_layers: 2,
        dropout: 0.1,
        max_position: 64,
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Translator::new(config, vb)?;

    let words = [BOS, "the", "cat", "sat", EOS];
    let ids = vocab.numberize(&words);
    println!("Source: {:?} -> {:?}\n", words, ids);
    let src = Tensor::from_vec(ids, (1, words.len()), &device)?;
    let src_mask = padding_mask(&src, broca_core::vocab::PAD_ID)?;

    // Greedy: exactly max_len ids, no early stop.
    let greedy = greedy_decode(&model, &src, &src_mask, 10, BOS_ID)?;
    let greedy_ids = greedy.to_vec2::<u32>()?.remove(0);
    println!("Greedy ids:    {:?}", greedy_ids);
    let trimmed = trim_at_eos(&greedy_ids, EOS_ID);
    println!("Greedy words:  {:?}", vocab.denumberize(trimmed)?);

    // Beam: one sequence per example, length-normalized ranking.
    let beam_config = BeamConfig {
        beam_width: 4,
        max_len: 10,
        ..Default::default()
    };
    let memory = model.encode(&src, &src_mask, false)?;
    let beamed = beam_search(&model, &memory, &src_mask, &beam_config)?;
    println!("\nBeam ids:      {:?}", beamed[0]);
    println!("Beam words:    {:?}", vocab.denumberize(&beamed[0])?);
    println!(
        "\n(beam width {}, length alpha {})",
        beam_config.beam_width, beam_config.length_alpha
    );

    Ok(())
}
