use primmap_core::common_tests::navigable_map_core_tests::*;
use primmap_core::{DeferredGuard, KeyComparator, MapConfig, SkipListMap};
use rstest::rstest;

type DeferredMap = SkipListMap<i64, String, DeferredGuard>;

#[rstest]
#[case::natural(DeferredMap::new())]
#[case::single_stripe(DeferredMap::with_config(MapConfig::new().counter_stripes(1)))]
fn test_insertion(#[case] map: DeferredMap) {
    test_sorted_insertion(&map);
}

#[rstest]
#[case::natural(DeferredMap::new())]
#[case::single_stripe(DeferredMap::with_config(MapConfig::new().counter_stripes(1)))]
fn test_put_semantics(#[case] map: DeferredMap) {
    test_overwrite(&map);
    map.clear();
    test_put_if_absent(&map);
}

#[rstest]
#[case::natural(DeferredMap::new())]
fn test_navigation(#[case] map: DeferredMap) {
    test_floor_ceiling(&map);
}

#[rstest]
#[case::natural(DeferredMap::new())]
fn test_remove_last_entry(#[case] map: DeferredMap) {
    test_remove_only_element(&map);
}

#[rstest]
#[case::natural(DeferredMap::new())]
fn test_sub_map(#[case] map: DeferredMap) {
    test_sub_map_range(&map);
}

#[rstest]
#[case::natural(DeferredMap::new())]
fn test_empty(#[case] map: DeferredMap) {
    test_empty_map(&map);
}

#[rstest]
#[case::natural(DeferredMap::new())]
fn test_write_through(#[case] map: DeferredMap) {
    test_views_write_through(&map);
}

#[rstest]
#[case::natural(DeferredMap::new())]
fn test_descending(#[case] map: DeferredMap) {
    test_descending_views(&map);
}

#[test]
fn test_reversed() {
    test_reversed_order::<DeferredGuard>();
}

#[test]
fn test_comparator() {
    test_custom_comparator::<DeferredGuard>();
}

#[rstest]
#[case::natural_seed_1(MapConfig::new(), 1)]
#[case::natural_seed_2(MapConfig::new(), 0xdead_beef)]
#[case::single_stripe(MapConfig::new().counter_stripes(1), 7)]
fn test_model(#[case] config: MapConfig<i64>, #[case] seed: u64) {
    test_against_model::<DeferredGuard>(config, seed);
}

#[rstest]
#[case::single_stripe(MapConfig::new().counter_stripes(1))]
#[case::striped(MapConfig::new().counter_stripes(64))]
fn test_concurrent(#[case] config: MapConfig<i64>) {
    test_concurrent_inserts::<DeferredGuard>(config);
}

#[rstest]
#[case::natural(MapConfig::new())]
#[case::striped(MapConfig::new().counter_stripes(64))]
fn test_bulk(#[case] config: MapConfig<i64>) {
    test_bulk_operations::<DeferredGuard>(config);
}

#[test]
fn test_retired_memory_is_tracked() {
    let map = DeferredMap::new();
    for k in 0..100 {
        map.put(k, k.to_string());
    }
    assert_eq!(map.guard().retired_count(), 0);

    // Each overwrite retires the previous value
    for k in 0..10 {
        map.put(k, "new".to_string());
    }
    assert_eq!(map.guard().retired_count(), 10);

    let before = map.guard().retired_count();
    map.remove(50);
    assert!(map.guard().retired_count() > before);

    // Clearing retires every remaining node once its index is gone
    let before = map.guard().retired_count();
    map.clear();
    assert!(map.guard().retired_count() >= before + 99);
}

#[test]
fn test_reversed_comparator_config() {
    let map = DeferredMap::with_config(MapConfig::new().comparator(KeyComparator::reverse_order()));
    for k in [1, 3, 2] {
        map.put(k, k.to_string());
    }
    assert_eq!(map.keys().collect::<Vec<_>>(), vec![3, 2, 1]);
    assert_eq!(map.first_key(), Ok(3));
    assert_eq!(map.higher_key(2), Ok(1));
}
