use bytes::Bytes;
use vttsource_media::boxes::{read_boxes, BoxRegistry, BoxType, IsoBox};
use vttsource_media::webvtt::{
    CueBox, EmptyCueBox, StringBox, Timestamp, WebVttCue, WebVttSample, WebVttSampleEntry,
};

fn reparse(mut b: IsoBox) -> IsoBox {
    let mut bytes = b.to_bytes().unwrap();
    let parsed = IsoBox::read(&mut bytes, &BoxRegistry::new()).unwrap();
    assert!(bytes.is_empty());
    parsed
}

#[test]
fn string_box_roundtrip() {
    let parsed = reparse(IsoBox::new(BoxType::IDEN, StringBox::new("cue-7")));
    assert_eq!(parsed.box_type(), BoxType::IDEN);
    assert_eq!(parsed.payload::<StringBox>().unwrap(), &StringBox::new("cue-7"));
}

#[test]
fn cue_box_roundtrip_with_partial_fields() {
    let cue = CueBox {
        settings: Some(StringBox::new("position:10%")),
        payload: Some(StringBox::new("<v Bob>Hi")),
        ..CueBox::default()
    };
    let parsed = reparse(IsoBox::new(BoxType::VTCU, cue));
    let cue = parsed.payload::<CueBox>().unwrap();
    assert!(cue.id.is_none());
    assert_eq!(cue.settings.as_ref().unwrap().as_bytes(), b"position:10%");
    assert_eq!(cue.payload.as_ref().unwrap().as_bytes(), b"<v Bob>Hi");
    assert!(cue.other_boxes.is_empty());
}

#[test]
fn sample_entry_roundtrip() {
    let mut entry = WebVttSampleEntry::new("WEBVTT\n\nSTYLE\n::cue { color: red }");
    entry.data_reference_index = 1;
    let parsed = reparse(IsoBox::new(BoxType::WVTT, entry));
    let entry = parsed.payload::<WebVttSampleEntry>().unwrap();
    assert_eq!(
        entry.config.as_bytes(),
        b"WEBVTT\n\nSTYLE\n::cue { color: red }"
    );
}

#[test]
fn empty_cue_roundtrip() {
    let parsed = reparse(IsoBox::new(BoxType::VTTE, EmptyCueBox::default()));
    assert_eq!(parsed.size(), 8);
    assert!(parsed.payload::<EmptyCueBox>().is_some());
}

#[test]
fn zero_cue_sample_reencodes_to_single_marker() {
    let marker = Bytes::from_static(&[0, 0, 0, 8, b'v', b't', b't', b'e']);
    let sample = WebVttSample::decode(marker.clone()).unwrap();
    assert!(sample.cues.is_empty());
    assert_eq!(sample.encode().unwrap().data, marker);
}

#[test]
fn split_cues_encode_independently() {
    let mut cue = WebVttCue::new("Hello", Timestamp::from_millis(0), Timestamp::from_millis(10_000));
    cue.id = Some("1".to_string());
    let tail = cue.split_at(Timestamp::from_millis(4_000)).unwrap();

    for part in [cue, tail] {
        let encoded = WebVttSample::new(vec![part.clone()]).encode().unwrap();
        let decoded = WebVttSample::decode(encoded.data).unwrap();
        assert_eq!(decoded.cues[0].id, part.id);
        assert_eq!(decoded.cues[0].text, part.text);
    }
}

#[test]
fn sample_bytes_are_flat_cue_boxes() {
    let sample = WebVttSample::new(vec![
        WebVttCue::new("a", Timestamp::ZERO, Timestamp::ZERO),
        WebVttCue::new("b", Timestamp::ZERO, Timestamp::ZERO),
    ]);
    let encoded = sample.encode().unwrap();
    let boxes = read_boxes(encoded.data, &BoxRegistry::new()).unwrap();
    let types: Vec<BoxType> = boxes.iter().map(IsoBox::box_type).collect();
    assert_eq!(types, vec![BoxType::VTCU, BoxType::VTCU]);
}
