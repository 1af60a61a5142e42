use assert_matches::assert_matches;

use kira_variant_trends::domain::{EpochDay, Granularity, MutationKey, SourceProfile, WeekWindow};
use kira_variant_trends::error::TrendsError;

#[test]
fn parse_epoch_day_valid() {
    let day: EpochDay = "2020-01-08".parse().unwrap();
    assert_eq!(day.value(), 7);
    assert_eq!(day.to_string(), "2020-01-08");
}

#[test]
fn parse_epoch_day_invalid() {
    let err = "2020-13-01".parse::<EpochDay>().unwrap_err();
    assert_matches!(err, TrendsError::InvalidDate(_));
}

#[test]
fn parse_source_profile() {
    let profile: SourceProfile = "Nextstrain".parse().unwrap();
    assert_eq!(profile, SourceProfile::Nextstrain);
    let err = "genbank".parse::<SourceProfile>().unwrap_err();
    assert_matches!(err, TrendsError::InvalidSource(_));
}

#[test]
fn parse_mutation_key() {
    let key: MutationKey = "Spike_D614G".parse().unwrap();
    assert_eq!(key.protein, "Spike");
    assert_eq!(key.mutation, "D614G");
    assert_eq!(key.position(), Some(614));
    assert_eq!(key.to_string(), "Spike_D614G");

    let deletion: MutationKey = "Spike_H69del".parse().unwrap();
    assert_eq!(deletion.position(), Some(69));
}

#[test]
fn parse_mutation_key_invalid() {
    let err = "Spike_".parse::<MutationKey>().unwrap_err();
    assert_matches!(err, TrendsError::InvalidMutation(_));
}

#[test]
fn week_windows_exclude_start_and_include_end() {
    let end: EpochDay = "2022-03-28".parse().unwrap();
    let window = WeekWindow::ending(end);
    assert_eq!(window.after.to_string(), "2022-03-21");
    assert_eq!(window.through, end);
}

#[test]
fn granularity_codes_round_trip() {
    for granularity in Granularity::ALL {
        assert_eq!(Granularity::from_code(granularity.code()), Some(granularity));
    }
    assert_eq!(Granularity::from_code(3), None);
    assert_eq!(Granularity::Region.to_string(), "region");
}
