//! Property tests for the sequence comparator and the text diff built on it.

use live_edit::diff::{
    apply_chunks, compare_strings, compare_strings_with_limit, diff, DiffChunk,
    PositionTranslator, SliceInput,
};
use proptest::prelude::*;

/// Small alphabet so random texts share lines and tokens.
fn source_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("function f() {"),
            Just("return 1;"),
            Just("return 2;"),
            Just(" "),
            Just("\n"),
            Just("}"),
            Just("x"),
            Just("+"),
            Just("var a = 3;"),
        ],
        0..40,
    )
    .prop_map(|parts| parts.concat())
}

fn replay<T: Clone>(old: &[T], new: &[T], chunks: &[DiffChunk]) -> Vec<T> {
    let mut out = Vec::new();
    let mut cursor = 0;
    let mut previous = None;
    for chunk in chunks {
        out.extend_from_slice(&old[cursor..chunk.old_start]);
        out.extend_from_slice(&new[chunk.new_start(previous)..chunk.new_end]);
        cursor = chunk.old_end;
        previous = Some(chunk);
    }
    out.extend_from_slice(&old[cursor..]);
    out
}

fn assert_ordered(chunks: &[DiffChunk]) {
    for pair in chunks.windows(2) {
        assert!(pair[0].old_end <= pair[1].old_start);
        assert!(pair[0].new_end <= pair[1].new_start(Some(&pair[0])));
        assert!(pair[0].old_start < pair[1].old_start || pair[0].old_end < pair[1].old_end);
    }
    for chunk in chunks {
        assert!(chunk.old_start <= chunk.old_end);
    }
}

proptest! {
    #[test]
    fn text_chunks_rebuild_new_text(old in source_text(), new in source_text()) {
        let chunks = compare_strings(&old, &new);
        prop_assert_eq!(apply_chunks(&old, &new, &chunks), new);
    }

    #[test]
    fn line_level_chunks_rebuild_new_text(old in source_text(), new in source_text()) {
        let chunks = compare_strings_with_limit(&old, &new, 0);
        prop_assert_eq!(apply_chunks(&old, &new, &chunks), new);
    }

    #[test]
    fn identical_texts_have_no_chunks(text in source_text()) {
        prop_assert!(compare_strings(&text, &text).is_empty());
    }

    #[test]
    fn text_chunks_are_ordered(old in source_text(), new in source_text()) {
        assert_ordered(&compare_strings(&old, &new));
    }

    #[test]
    fn slice_chunks_rebuild_new_sequence(
        old in prop::collection::vec(0u8..4, 0..60),
        new in prop::collection::vec(0u8..4, 0..60),
    ) {
        let chunks = diff(&SliceInput::new(&old, &new));
        assert_ordered(&chunks);
        prop_assert_eq!(replay(&old, &new, &chunks), new);
    }

    #[test]
    fn translated_positions_stay_in_bounds(old in source_text(), new in source_text()) {
        let chunks = compare_strings(&old, &new);
        let translator = PositionTranslator::new(&chunks);
        for position in 0..=old.len() {
            prop_assert!(translator.translate(position) <= new.len());
        }
    }
}

#[test]
fn single_token_change_is_a_single_small_chunk() {
    let old = "function f() {\n  return 1;\n}\n";
    let new = "function f() {\n  return 2;\n}\n";
    let chunks = compare_strings(old, new);
    assert_eq!(chunks.len(), 1);
    let chunk = chunks[0];
    assert_eq!(&old[chunk.old_start..chunk.old_end], "1");
    assert_eq!(&new[chunk.new_start(None)..chunk.new_end], "2");
}
