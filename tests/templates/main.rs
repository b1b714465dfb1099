//! Integration tests for date selection, template resolution and catalog
//! loading

use chrono::{Datelike, NaiveDate};

use databrew::app::{make_pairs, DateSelector, PathTemplate};
use databrew::config::Catalog;
use databrew::errors::{AppError, ConfigError, SelectorError, TemplateError};

fn template(raw: &str) -> PathTemplate {
    PathTemplate::new(raw).unwrap()
}

#[test]
fn test_three_day_range_gives_distinct_ascending_paths() {
    let t = template("/data/{t:%Y}/file_{t:%Y%m%d}.nc");
    let sel = DateSelector::parse("2020-01-01:2020-01-03:1D").unwrap();

    let paths = t.resolve(&sel).unwrap();
    assert_eq!(
        paths,
        [
            "/data/2020/file_20200101.nc",
            "/data/2020/file_20200102.nc",
            "/data/2020/file_20200103.nc",
        ]
    );
}

#[test]
fn test_every_date_field_uses_the_same_date() {
    let t = template("/data/{t:%Y}/{t:%m}/file_{t:%Y-%m-%d}.nc");
    let sel = DateSelector::parse("2019-12-30:2020-01-02").unwrap();

    for (path, date) in t.resolve(&sel).unwrap().iter().zip(sel.dates()) {
        let parts: Vec<&str> = path.trim_start_matches("/data/").split('/').collect();
        let stamp = parts[2]
            .trim_start_matches("file_")
            .trim_end_matches(".nc");
        let parsed = NaiveDate::parse_from_str(stamp, "%Y-%m-%d").unwrap();

        assert_eq!(parsed, date.date());
        assert_eq!(parts[0], date.year().to_string());
        assert_eq!(parts[1], format!("{:02}", date.month()));
    }
}

#[test]
fn test_coarse_template_drops_repeats_in_order() {
    let monthly = template("ftp://host/{t:%Y}/sst_{t:%Y%m}.nc");
    let sel = DateSelector::parse("2020-01-30:2020-02-02").unwrap();

    let paths = monthly.resolve(&sel).unwrap();
    assert!(paths.len() <= sel.dates().len());
    assert_eq!(
        paths,
        ["ftp://host/2020/sst_202001.nc", "ftp://host/2020/sst_202002.nc"]
    );
}

#[test]
fn test_pairs_fail_only_on_length_mismatch() {
    let daily = template("ftp://host/{t:%Y%m%d}.nc");
    let local = template("/store/{t:%Y%m%d}.nc");
    let monthly = template("/store/{t:%Y%m}.nc");
    let sel = DateSelector::parse("2020-01-30:2020-02-02").unwrap();

    let rows = make_pairs(&sel, &[&daily, &local]).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[3], ["ftp://host/20200202.nc", "/store/20200202.nc"]);

    let err = make_pairs(&sel, &[&daily, &monthly]).unwrap_err();
    assert!(matches!(
        err,
        AppError::Config(ConfigError::MismatchedPaths { ref lengths, .. }) if lengths == &[4, 2]
    ));

    // a single date cannot tell them apart
    let single = DateSelector::parse("2020-01-30").unwrap();
    assert!(make_pairs(&single, &[&daily, &monthly]).is_ok());
}

#[test]
fn test_selector_forms() {
    assert!(DateSelector::parse("2020-02-29").unwrap().is_single());
    assert_eq!(
        DateSelector::parse("2020-01-01T06:30").unwrap().dates()[0]
            .format("%H%M")
            .to_string(),
        "0630"
    );
    assert_eq!(
        DateSelector::parse("2020-01-01,2020-03-01,2020-02-01")
            .unwrap()
            .dates()
            .len(),
        3
    );
    assert_eq!(
        DateSelector::parse("2020-01-15::1MS").unwrap().dates()[0].date(),
        NaiveDate::from_ymd_opt(2020, 2, 1).unwrap()
    );
    assert_eq!(
        DateSelector::parse("2020-01-01T00:00:2020-01-01T12:00:6h")
            .unwrap()
            .dates()
            .len(),
        3
    );
}

#[test]
fn test_selector_errors() {
    assert_eq!(
        DateSelector::parse(":2020-01-03").unwrap_err(),
        SelectorError::MissingStart
    );
    assert!(matches!(
        DateSelector::parse("2020-01-01:2020-01-03:0D").unwrap_err(),
        SelectorError::ZeroFrequency { .. }
    ));
    assert!(matches!(
        DateSelector::parse("2020-01-01:2020-01-03:fortnight").unwrap_err(),
        SelectorError::InvalidFrequency { .. }
    ));
    assert!(matches!(
        DateSelector::parse("01/02/2020").unwrap_err(),
        SelectorError::InvalidDate { .. }
    ));
}

#[test]
fn test_bare_tokens_rejected() {
    assert!(matches!(
        PathTemplate::new("/data/%Y/file.nc").unwrap_err(),
        TemplateError::BareDateTokens { .. }
    ));
    // percent-escapes in URLs are fine
    assert!(PathTemplate::new("https://host/a%20b/{t:%Y}.nc").is_ok());
}

#[test]
fn test_catalog_record_resolves_paths() {
    let catalog = Catalog::from_toml_str(
        r#"
[vars]
STORE = "/srv/mirror"

[records.chl]
description = "Ocean colour chlorophyll"
variables = ["chlor_a"]
url = "sftp://oc.example.org/pub/{t:%Y}/CHL_{t:%Y%m%d}*.nc"
local_store = "{STORE}/chl/{t:%Y}/CHL_{t:%Y%m%d}.nc"
[records.chl.login]
username = "reader"
password = "pw"
"#,
    )
    .unwrap();

    let record = catalog.build_record("chl").unwrap();
    let pairs = record
        .pairs(&DateSelector::parse("2021-12-31:2022-01-01").unwrap())
        .unwrap();

    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[1].remote, "sftp://oc.example.org/pub/2022/CHL_20220101*.nc");
    assert_eq!(
        pairs[1].local.to_str().unwrap(),
        "/srv/mirror/chl/2022/CHL_20220101.nc"
    );
}
