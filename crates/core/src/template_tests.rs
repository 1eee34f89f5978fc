// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn substitutes_all_occurrences() {
    let out = substitute(
        "{mirror_root}/{mirror_name}/{mirror_name}_{date}.log",
        &[("mirror_root", "/srv"), ("mirror_name", "debian"), ("date", "2024-01-01_00-00")],
    );
    assert_eq!(out, "/srv/debian/debian_2024-01-01_00-00.log");
}

#[test]
fn unknown_placeholders_survive() {
    let out = substitute("{mirror_root}/_gc_{timestamp}", &[("mirror_root", "/srv")]);
    assert_eq!(out, "/srv/_gc_{timestamp}");
}

#[test]
fn second_pass_fills_remaining_placeholder() {
    let first = substitute("{mirror_root}/{mirror_name}/_gc_{timestamp}", &[
        ("mirror_root", "/srv"),
        ("mirror_name", "debian"),
    ]);
    let second = substitute(&first, &[("timestamp", "1700000000")]);
    assert_eq!(second, "/srv/debian/_gc_1700000000");
}

#[test]
fn template_without_placeholders_is_unchanged() {
    assert_eq!(substitute("/dev/null", &[("date", "x")]), "/dev/null");
}
