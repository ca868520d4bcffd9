// Property: archive status is monotonic. Applying any sequence of requested
// transitions through `can_transition_to` never leaves a terminal state, and
// a crawl result's asset total always equals the sum of its pages' assets.

use proptest::prelude::*;
use site_archiver_core::*;

fn arb_status() -> impl Strategy<Value = ArchiveStatus> {
    prop_oneof![
        Just(ArchiveStatus::Pending),
        Just(ArchiveStatus::InProgress),
        Just(ArchiveStatus::Completed),
        Just(ArchiveStatus::Failed),
    ]
}

fn arb_asset() -> impl Strategy<Value = AssetRecord> {
    ("[a-z]{1,10}", 0u64..100_000).prop_map(|(name, size)| AssetRecord {
        kind: AssetKind::Image,
        original_url: format!("https://example.com/{}.png", name),
        local_path: format!("assets/image/{}.png", name),
        size,
        compressed_size: None,
        mime_type: "image/png".to_string(),
    })
}

fn arb_page() -> impl Strategy<Value = PageRecord> {
    ("[a-z]{1,10}", prop::collection::vec(arb_asset(), 0..6)).prop_map(|(path, assets)| PageRecord {
        url: format!("https://example.com/{}", path),
        title: Some(path.clone()),
        file_path: format!("pages/_{}.html", path),
        links_count: 0,
        assets,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_status_is_monotonic(requests in prop::collection::vec(arb_status(), 0..20)) {
        let mut current = ArchiveStatus::InProgress;
        let mut reached_terminal: Option<ArchiveStatus> = None;

        for next in requests {
            if current.can_transition_to(next) {
                current = next;
            }
            if let Some(terminal) = reached_terminal {
                prop_assert_eq!(current, terminal);
            }
            if current.is_terminal() && reached_terminal.is_none() {
                reached_terminal = Some(current);
            }
        }
    }

    #[test]
    fn test_crawl_result_total_matches_pages(pages in prop::collection::vec(arb_page(), 0..8)) {
        let expected: usize = pages.iter().map(|p| p.assets.len()).sum();
        let result = CrawlResult::new(pages);
        prop_assert_eq!(result.total_assets(), expected);
    }
}
