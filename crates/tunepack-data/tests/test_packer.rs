//! Integration tests for constant-length packing

use anyhow::Result;
use proptest::prelude::*;
use std::cell::{Cell, RefCell};
use tunepack_data::{
    MemorySource, PackedWindow, PackerConfig, RawRecord, SequencePacker, Template, TextField,
};
use tunepack_tokenizer::{CharTokenizer, TextCodec};

const EOT: u32 = CharTokenizer::END_OF_TEXT_ID;

fn text_records(texts: &[String]) -> Vec<RawRecord> {
    texts
        .iter()
        .map(|t| RawRecord::new().with("text", t.as_str()))
        .collect()
}

/// Every record's tokens followed by one boundary token
fn full_stream(texts: &[String]) -> Vec<u32> {
    let mut stream = Vec::new();
    for text in texts {
        stream.extend(CharTokenizer.encode(text).unwrap());
        stream.push(EOT);
    }
    stream
}

fn text_packer(texts: &[String], config: PackerConfig) -> SequencePacker<'static> {
    SequencePacker::new(
        &CharTokenizer,
        MemorySource::new(text_records(texts)),
        TextField::new("text"),
        config,
    )
    .expect("Failed to create packer")
}

fn pack_all(texts: &[String], config: PackerConfig) -> Vec<PackedWindow> {
    let packer = SequencePacker::new(
        &CharTokenizer,
        MemorySource::new(text_records(texts)),
        TextField::new("text"),
        config,
    )
    .expect("Failed to create packer");
    packer.collect::<Result<_>>().expect("Packing failed")
}

#[test]
fn test_question_answer_scenario() {
    let records = vec![
        RawRecord::new().with("question", "A").with("answer", "B"),
        RawRecord::new().with("question", "C").with("answer", "D"),
    ];
    let mut packer = SequencePacker::new(
        &CharTokenizer,
        MemorySource::new(records),
        Template::question_answer(),
        PackerConfig::new(5),
    )
    .expect("Failed to create packer");

    let mut decoded = String::new();
    let mut count = 0;
    while let Some(window) = packer.next_window().expect("Packing failed") {
        assert_eq!(window.input_ids.len(), 5);
        decoded.push_str(&CharTokenizer.decode(&window.input_ids).unwrap());
        count += 1;
    }

    let expected = "Question: A\n\nAnswer: B<|endoftext|>Question: C\n\nAnswer: D";
    assert_eq!(count, 9);
    assert!(decoded.starts_with("Quest"));
    // 46 tokens in the stream; the 9 windows cover all but the final boundary
    assert_eq!(decoded, expected);
    assert!(packer.next_window().unwrap().is_none());
}

#[test]
fn test_reset_matches_fresh_packer() {
    let texts: Vec<String> = (0..12).map(|i| format!("record number {}", i)).collect();
    let config = PackerConfig::new(9).num_of_sequences(4);

    let mut packer = SequencePacker::new(
        &CharTokenizer,
        MemorySource::new(text_records(&texts)),
        TextField::new("text"),
        config,
    )
    .unwrap();

    // Inspecting a sample consumes it
    let sample = packer.next_window().unwrap().unwrap();
    packer.next_window().unwrap();
    packer.reset_cursor(0).unwrap();
    assert_eq!(packer.cursor(), 0);
    assert_eq!(packer.buffered(), 0);

    let after_reset: Vec<PackedWindow> = packer
        .by_ref()
        .take(5)
        .collect::<Result<_>>()
        .unwrap();
    let fresh: Vec<PackedWindow> = pack_all(&texts, config).into_iter().take(5).collect();
    assert_eq!(after_reset, fresh);
    assert_eq!(after_reset[0], sample);
}

#[test]
fn test_reset_cursor_to_middle() {
    let texts: Vec<String> = vec!["aaa".into(), "bbb".into(), "ccc".into()];
    let mut packer = SequencePacker::new(
        &CharTokenizer,
        MemorySource::new(text_records(&texts)),
        TextField::new("text"),
        PackerConfig::new(4),
    )
    .unwrap();

    packer.reset_cursor(2).unwrap();
    let window = packer.next_window().unwrap().unwrap();
    assert_eq!(CharTokenizer.decode(&window.input_ids).unwrap(), "ccc<|endoftext|>");
    assert!(packer.next_window().unwrap().is_none());

    assert!(packer.reset_cursor(4).is_err());
}

#[test]
fn test_infinite_mode_pulls_first_record_again() {
    let pulled = RefCell::new(Vec::new());
    let formatter = |record: &RawRecord| -> Result<String> {
        let text = record.get("text").unwrap_or_default().to_string();
        pulled.borrow_mut().push(text.clone());
        Ok(text)
    };

    let texts: Vec<String> = vec!["one".into(), "two".into(), "three".into()];
    let n = texts.len();
    {
        let mut packer = SequencePacker::new(
            &CharTokenizer,
            MemorySource::new(text_records(&texts)),
            formatter,
            PackerConfig::new(3).infinite(true).num_of_sequences(1),
        )
        .unwrap();

        for _ in 0..10 {
            let window = packer.next_window().unwrap().expect("infinite packer ended");
            assert_eq!(window.len(), 3);
        }
        assert!(packer.epoch() >= 1);
    }

    let pulled = pulled.into_inner();
    assert!(pulled.len() > n);
    assert_eq!(pulled[n], pulled[0]);
    for (i, text) in pulled.iter().enumerate() {
        assert_eq!(text, &texts[i % n]);
    }
}

#[test]
fn test_tokenizer_failure_propagates() {
    struct Failing;
    impl TextCodec for Failing {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            if text.contains("bad") {
                anyhow::bail!("cannot encode {:?}", text);
            }
            Ok(vec![1; text.len()])
        }
        fn decode(&self, _ids: &[u32]) -> Result<String> {
            Ok(String::new())
        }
        fn end_of_text_token_id(&self) -> u32 {
            0
        }
    }

    let texts: Vec<String> = vec!["good".into(), "bad".into(), "good".into()];
    let mut packer = SequencePacker::new(
        &Failing,
        MemorySource::new(text_records(&texts)),
        TextField::new("text"),
        PackerConfig::new(100).num_of_sequences(1),
    )
    .unwrap();

    let err = packer.next_window().unwrap_err();
    assert!(format!("{:#}", err).contains("cannot encode"));
    assert_eq!(packer.stats().windows, 0);
}

#[test]
fn test_state_after_format_error_replays_live_stream() {
    let texts: Vec<String> = vec!["alpha".into(), "bad".into(), "gamma".into(), "delta".into()];
    let config = PackerConfig::new(4).num_of_sequences(1);

    // Fails the first time it sees "bad", then formats it normally
    let failed = Cell::new(false);
    let flaky = |record: &RawRecord| -> Result<String> {
        let text = record.get("text").unwrap_or_default().to_string();
        if text == "bad" && !failed.replace(true) {
            anyhow::bail!("transient formatting failure");
        }
        Ok(text)
    };
    let mut live = SequencePacker::new(
        &CharTokenizer,
        MemorySource::new(text_records(&texts)),
        flaky,
        config,
    )
    .unwrap();

    assert!(live.next_window().unwrap().is_some());
    assert!(live.next_window().is_err());
    let state = live.state();
    assert_eq!(state.cursor, 1);
    assert_eq!(live.stats().records, 1);

    let mut restored = text_packer(&texts, config);
    restored.restore_state(&state).unwrap();

    let live_rest: Vec<PackedWindow> = live.by_ref().collect::<Result<_>>().unwrap();
    let restored_rest: Vec<PackedWindow> = restored.collect::<Result<_>>().unwrap();
    assert_eq!(live_rest, restored_rest);
    assert_eq!(live.stats().records, texts.len());

    let emitted: Vec<u32> = live_rest.iter().flat_map(|w| w.input_ids.clone()).collect();
    let decoded = CharTokenizer.decode(&emitted).unwrap();
    assert_eq!(decoded.matches("bad").count(), 1);
    assert_eq!(decoded.matches("gamma").count(), 1);
}

#[test]
fn test_peek_across_infinite_restart() {
    let texts: Vec<String> = vec!["abc".into(), "de".into()];
    let mut packer = text_packer(&texts, PackerConfig::new(4).infinite(true).num_of_sequences(1));

    packer.next_window().unwrap();
    let state = packer.state();
    let stats = packer.stats();

    // "de" plus its boundary leaves the window short; filling it restarts
    let peeked = packer.peek().unwrap().unwrap();
    assert_eq!(CharTokenizer.decode(&peeked.input_ids).unwrap(), "de<|endoftext|>a");
    assert_eq!(packer.state(), state);
    assert_eq!(packer.stats(), stats);
    assert_eq!(packer.epoch(), 0);
    assert_eq!(packer.cursor(), 1);

    assert_eq!(packer.next_window().unwrap(), Some(peeked));
    assert_eq!(packer.epoch(), 1);
    assert_eq!(packer.stats().restarts, 1);
}

#[test]
fn test_reset_after_infinite_wrap() {
    let texts: Vec<String> = vec!["abc".into(), "de".into()];
    let config = PackerConfig::new(4).infinite(true).num_of_sequences(1);
    let fresh: Vec<PackedWindow> = text_packer(&texts, config)
        .take(6)
        .collect::<Result<_>>()
        .unwrap();

    let mut packer = text_packer(&texts, config);
    for _ in 0..5 {
        packer.next_window().unwrap();
    }
    assert!(packer.epoch() >= 1);

    packer.reset_cursor(0).unwrap();
    let epoch = packer.epoch();
    assert!(epoch >= 1);
    let after_cursor_reset: Vec<PackedWindow> =
        packer.by_ref().take(6).collect::<Result<_>>().unwrap();
    assert_eq!(after_cursor_reset, fresh);

    packer.reset().unwrap();
    assert_eq!(packer.state(), text_packer(&texts, config).state());
    let after_reset: Vec<PackedWindow> = packer.by_ref().take(6).collect::<Result<_>>().unwrap();
    assert_eq!(after_reset, fresh);
}

proptest! {
    #[test]
    fn prop_finite_windows_are_full_and_ordered(
        texts in prop::collection::vec("[a-z ]{0,12}", 0..20),
        window_length in 1usize..16,
        refill in 1usize..8,
    ) {
        let stream = full_stream(&texts);
        let windows = pack_all(&texts, PackerConfig::new(window_length).num_of_sequences(refill));

        let emitted: Vec<u32> = windows.iter().flat_map(|w| w.input_ids.clone()).collect();
        for window in &windows {
            prop_assert_eq!(window.input_ids.len(), window_length);
            prop_assert_eq!(&window.labels, &window.input_ids);
        }
        prop_assert!(emitted.len() <= stream.len());
        prop_assert!(stream.len() - emitted.len() < window_length);
        prop_assert_eq!(&emitted[..], &stream[..emitted.len()]);
    }

    #[test]
    fn prop_refill_size_does_not_change_output(
        texts in prop::collection::vec("[a-z]{0,10}", 0..15),
        window_length in 1usize..12,
        refill in 2usize..10,
    ) {
        let one = pack_all(&texts, PackerConfig::new(window_length).num_of_sequences(1));
        let many = pack_all(&texts, PackerConfig::new(window_length).num_of_sequences(refill));
        prop_assert_eq!(one, many);
    }

    #[test]
    fn prop_one_boundary_between_records(
        texts in prop::collection::vec("[a-z]{0,10}", 1..15),
        window_length in 1usize..12,
    ) {
        let windows = pack_all(&texts, PackerConfig::new(window_length));
        let emitted: Vec<u32> = windows.iter().flat_map(|w| w.input_ids.clone()).collect();

        // Splitting on the boundary recovers the records in order, each once
        let mut segments = emitted.split(|&id| id == EOT);
        for text in &texts {
            match segments.next() {
                Some(segment) if segment.len() == text.len() => {
                    prop_assert_eq!(segment.to_vec(), CharTokenizer.encode(text).unwrap());
                }
                Some(segment) => {
                    // Truncated final record
                    prop_assert!(segment.len() < text.len());
                    prop_assert!(segments.next().is_none());
                    break;
                }
                None => break,
            }
        }
    }
}
