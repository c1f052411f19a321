use hoopla_core::tokenizer::Analyzer;

#[test]
fn it_normalizes_and_stems() {
    let words = Analyzer::default().analyze("Running Runners RUN! The café's menu.");
    assert!(words.contains(&"run".to_string()));
    // NFKC keeps the accent; apostrophe is stripped
    assert!(words.iter().any(|w| w.starts_with("café")));
    assert!(!words.iter().any(|w| w.contains('!')));
}

#[test]
fn it_filters_stopwords() {
    let words = Analyzer::default().analyze("The quick brown fox and the lazy dog");
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
    assert_eq!(words.len(), 5);
}

#[test]
fn external_stop_list_replaces_default() {
    let analyzer = Analyzer::new(["bear", "movie"]);
    assert_eq!(analyzer.analyze("The bear movie"), vec!["the".to_string()]);
}

#[test]
fn compatibility_forms_fold() {
    // fullwidth letters and the "fi" ligature normalize to plain ASCII
    let analyzer = Analyzer::default();
    assert_eq!(analyzer.analyze("ＢＥＡＲ"), analyzer.analyze("bear"));
    assert_eq!(analyzer.analyze("ﬁsh"), analyzer.analyze("fish"));
}

#[test]
fn query_and_document_share_one_pipeline() {
    let analyzer = Analyzer::default();
    assert_eq!(analyzer.single_term("Bears!").unwrap(), analyzer.analyze("bear")[0]);
}
