//! Tests for SGR decoding and range reconstruction.

use execstream::ansi::{Ansi, AnsiDecoder, Attribute, BaseColor, StyleCode, Underline, Weight};

#[test]
fn blue_range_is_closed_by_reset() {
    let decoded = Ansi::new().decode("before \x1B[34mblue \x1B[0mafter", &[]);
    assert_eq!(decoded.text, "before blue after");
    assert_eq!(decoded.ranges.len(), 1);

    let range = &decoded.ranges[0];
    assert_eq!((range.start, range.end), (7, 12));
    assert_eq!(range.code, StyleCode::Foreground(BaseColor::Blue));
    assert!(range.code.is_fg_color());
    assert!(decoded.open.is_empty());
}

#[test]
fn bold_continues_across_chunks_without_gap() {
    let mut decoder = AnsiDecoder::new(Ansi::new());
    let first = decoder.decode(" \x1B[1mPlease note...");
    let second = decoder.decode(" this continues");

    assert_eq!(first.ranges.len(), 1);
    assert_eq!(second.ranges.len(), 1);
    let a = &first.ranges[0];
    let b = &second.ranges[0];
    assert_eq!(a.attribute, Attribute::Weight(Weight::Bold));
    assert_eq!(b.attribute, Attribute::Weight(Weight::Bold));

    // End of the first range meets the start of the second in absolute offsets.
    assert_eq!(first.offset + a.end, second.offset + b.start);
    assert_eq!(second.offset + b.end, first.text.len() + second.text.len());
}

#[test]
fn clean_text_drops_only_well_formed_escapes() {
    let cases = [
        ("plain", "plain"),
        ("\x1B[0m", ""),
        ("\x1B[mreset", "reset"),
        ("a\x1B[1;4;31;42mb\x1B[0mc", "abc"),
        ("a\x1B[38;5;1mb", "ab"),
        ("\x1B[Hhome\x1B[2J", "home"),
        ("lone \x1B escape", "lone \x1B escape"),
        ("\x1B]0;title\x07text", "\x1B]0;title\x07text"),
        ("cut \x1B[3", "cut \x1B[3"),
    ];
    for (raw, clean) in cases {
        assert_eq!(Ansi::strip(raw), clean, "input {raw:?}");
        assert_eq!(Ansi::new().decode(raw, &[]).text, clean, "input {raw:?}");
    }
}

#[test]
fn overlapping_ranges_close_independently() {
    let raw = "\x1B[4m\x1B[31mred-under\x1B[24m red\x1B[39m \x1B[21mdouble\x1B[0m";
    let decoded = Ansi::new().decode(raw, &[]);
    assert_eq!(decoded.text, "red-under red double");

    let summary: Vec<(usize, usize, u8)> = decoded
        .ranges
        .iter()
        .map(|r| (r.start, r.end, r.code.code()))
        .collect();
    assert_eq!(summary, vec![(0, 9, 4), (0, 13, 31), (14, 20, 21)]);
    assert_eq!(
        decoded.ranges[2].attribute,
        Attribute::Underline(Underline::Double)
    );
}

#[test]
fn bright_colors_resolve_to_light_palette() {
    let decoded = Ansi::new().decode("\x1B[91;100mx", &[]);
    assert_eq!(decoded.ranges.len(), 2);
    assert_eq!(
        decoded.ranges[0].attribute,
        Attribute::Foreground(BaseColor::Red.color(true))
    );
    assert_eq!(
        decoded.ranges[1].attribute,
        Attribute::Background(BaseColor::Black.color(true))
    );
    assert!(decoded.ranges.iter().all(|r| r.code.is_bright_color()));
}

#[test]
fn remap_changes_resolution_not_ranges() {
    let ansi = Ansi::with_mapping(|code| match code {
        StyleCode::Foreground(BaseColor::Blue) => StyleCode::Foreground(BaseColor::Cyan),
        other => other,
    });
    let decoded = ansi.decode("\x1B[34mx\x1B[0m", &[]);
    assert_eq!(decoded.ranges[0].code, StyleCode::Foreground(BaseColor::Blue));
    assert_eq!(
        decoded.ranges[0].attribute,
        Attribute::Foreground(BaseColor::Cyan.color(false))
    );
}

#[test]
fn offsets_are_monotonic_across_stream() {
    let chunks = ["\x1B[32mgr", "een\x1B[", "0m and \x1B[1", "mbold", "\x1B[0m!"];
    let mut decoder = AnsiDecoder::new(Ansi::new());
    let mut total = 0;
    let mut text = String::new();

    for chunk in chunks {
        let styled = decoder.decode(chunk);
        assert_eq!(styled.offset, total);
        for range in &styled.ranges {
            assert!(range.start < range.end);
            assert!(range.end <= styled.text.len());
        }
        total += styled.text.len();
        text.push_str(&styled.text);
    }
    assert_eq!(text, "green and bold!");
    assert_eq!(decoder.offset(), total);
    assert!(decoder.open_codes().is_empty());
}

#[test]
fn styled_text_serializes_codes_as_numbers() {
    let decoded = Ansi::new().decode("\x1B[1mhi", &[]);
    let json = serde_json::to_value(&decoded).unwrap();
    assert_eq!(json["text"], "hi");
    assert_eq!(json["ranges"][0]["code"], 1);
    assert_eq!(json["ranges"][0]["attribute"]["kind"], "weight");
    assert_eq!(json["open"][0], 1);
}
