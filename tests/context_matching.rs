use {jprof::Context, proptest::prelude::*};

fn context(text: &str) -> Context {
  Context::parse(Some(text))
}

/// Arbitrary outer frames with names that never collide with `C.m`.
fn outer_frames() -> impl Strategy<Value = Vec<String>> {
  prop::collection::vec("[x-z][a-z]{0,4}\\.[a-w]{1,4}", 0..8)
}

fn with_top<'a>(outer: &'a [String], top: &'a [&'a str]) -> Vec<&'a str> {
  outer
    .iter()
    .map(String::as_str)
    .chain(top.iter().copied())
    .collect()
}

#[test]
fn exact_path_matches_only_that_path() {
  let exact = context("/a/b/C.m");

  assert!(exact.matches(&["outer.run", "a", "b", "C.m"][..]));
  assert!(exact.matches(&["a", "b", "C.m"][..]));
  assert!(!exact.matches(&["outer.run", "a", "x", "C.m"][..]));
  assert!(!exact.matches(&["b", "C.m"][..]));
}

#[test]
fn single_wildcard_needs_exactly_one_caller() {
  let single = context("/./C.m");

  assert!(single.matches(&["Any.caller", "C.m"][..]));
  assert!(single.matches(&["Deep.root", "Other.caller", "C.m"][..]));
  assert!(!single.matches(&["C.m"][..]));
  assert!(!single.matches(&["Any.caller", "C.other"][..]));
}

#[test]
fn ellipsis_accepts_any_number_of_callers() {
  let ellipsis = context("/.../C.m");

  assert!(ellipsis.matches(&["C.m"][..]));
  assert!(ellipsis.matches(&["X.x", "C.m"][..]));
  assert!(ellipsis.matches(&["X.x", "Y.y", "C.m"][..]));
  assert!(!ellipsis.matches(&["X.x", "C.n"][..]));
}

#[test]
fn ellipsis_between_literals_floats_over_frames() {
  let floating = context("/A.run/.../C.m");

  assert!(floating.matches(&["A.run", "C.m"][..]));
  assert!(floating.matches(&["A.run", "B.step", "B.more", "C.m"][..]));
  assert!(!floating.matches(&["Z.run", "B.step", "C.m"][..]));
}

#[test]
fn expressions_without_a_leading_slash_match_everything() {
  let permissive = context("C.m");
  let empty: [&str; 0] = [];

  assert!(permissive.segments().is_empty());
  assert!(permissive.matches(&empty[..]));
  assert!(permissive.matches(&["Other.thing"][..]));
  assert!(Context::parse(None).matches(&["X.y"][..]));
}

#[test]
fn attributes_are_split_from_the_path() {
  let parsed = context("/.../pkg.C.m{trace, locals}");

  assert_eq!(parsed.name(), "pkg.C.m");
  assert!(parsed.has_attribute("trace"));
  assert!(parsed.has_attribute("locals"));
  assert_eq!(parsed.min_depth(), 1);
}

proptest! {
  #[test]
  fn prop_ellipsis_ignores_outer_frames(outer in outer_frames()) {
    let stack = with_top(&outer, &["C.m"]);
    prop_assert!(context("/.../C.m").matches(&stack[..]));
  }

  #[test]
  fn prop_single_wildcard_depends_only_on_depth(outer in outer_frames()) {
    let stack = with_top(&outer, &["C.m"]);
    prop_assert_eq!(
      context("/./C.m").matches(&stack[..]),
      stack.len() >= 2
    );
  }

  #[test]
  fn prop_exact_path_rejects_a_wrong_middle_frame(outer in outer_frames()) {
    let good = with_top(&outer, &["a", "b", "C.m"]);
    let bad = with_top(&outer, &["a", "x", "C.m"]);

    prop_assert!(context("/a/b/C.m").matches(&good[..]));
    prop_assert!(!context("/a/b/C.m").matches(&bad[..]));
  }
}
