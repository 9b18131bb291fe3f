mod common;

use common::*;
use flowprobe::locator::Locator;
use flowprobe::resolver::resolve;
use flowprobe::{ScenarioRunner, ScenarioStatus, Step, StepExecutor, StepStatus, TextMatch};
use test_case::test_case;

/// The bundled suite is well-formed and its link tables expand to
/// single-locator steps.
#[test]
fn bundled_suite_parses_and_compiles() {
    let suite = bundled_suite();
    assert_eq!(suite.base_url, BASE);
    assert_eq!((suite.viewport.width, suite.viewport.height), (1500, 800));
    assert_eq!(suite.scenarios.len(), 6);

    for scenario in &suite.scenarios {
        let steps = scenario.compile();
        assert!(!steps.is_empty(), "{} compiled to nothing", scenario.name);
    }

    let navbar = suite.scenarios[0].compile();
    let urls: Vec<String> = navbar
        .iter()
        .filter_map(|s| match s {
            Step::AssertUrl { expected } => Some(expected.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(urls, vec!["\"/tools/\"", "\"/submit/\"", "\"/search/\"", "\"/signin/\"", "\"/signup/\""]);
}

/// Every scenario of the bundled suite passes against the site model.
#[tokio::test]
async fn bundled_suite_passes_on_site_model() {
    init_tracing();
    let driver = memory_driver();
    let runner = ScenarioRunner::new(driver.clone(), fast_config());

    let report = runner.run(&[bundled_suite()]).await.unwrap();
    for outcome in &report.scenarios {
        assert_eq!(
            outcome.status,
            ScenarioStatus::Passed,
            "{} failed: {:?}",
            outcome.name,
            outcome.failure
        );
    }
    let summary = report.summarize();
    assert_eq!((summary.total, summary.passed), (6, 6));

    let log = driver.log();
    assert_eq!(log.contexts_opened.len(), 1);
    assert_eq!(log.contexts_closed, log.contexts_opened);
    assert_eq!(log.surfaces.len(), 3);
}

/// Clicking the Free filter from the home page lands exactly on the free
/// pricing listing.
#[tokio::test]
async fn free_filter_lands_on_pricing_type_free() {
    let driver = memory_driver();
    let (context, mut page) = home_page(&driver).await;
    let config = fast_config();

    let records = StepExecutor::new(page.as_mut(), BASE, &config)
        .execute(&[
            Step::Click {
                locator: Locator::test_id("filter-link-free"),
            },
            Step::WaitForIdle { timeout_ms: 1_000 },
            Step::AssertUrl {
                expected: "/tools/?pricingType=free".into(),
            },
        ])
        .await;

    assert!(records.iter().all(|r| r.status == StepStatus::Passed), "{:?}", records);
    assert_eq!(page.url().await.unwrap(), "https://aiaxio.com/tools/?pricingType=free");
    context.close().await.unwrap();
}

fn newsletter(email: &str) -> Vec<Step> {
    let textbox = Locator::role("textbox", "@ Enter your email");
    vec![
        Step::Click { locator: textbox.clone() },
        Step::Fill {
            locator: textbox,
            value: email.to_string(),
        },
        Step::Click {
            locator: Locator::role("button", "Subscribe"),
        },
        Step::AssertVisible {
            locator: Locator::text("Thanks for subscribing!"),
        },
    ]
}

/// A valid email shows the confirmation; anything else leaves it hidden.
#[test_case("abc@gmail.com", StepStatus::Passed ; "valid email")]
#[test_case("abc", StepStatus::Failed ; "missing domain")]
#[test_case("", StepStatus::Failed ; "empty")]
#[tokio::test]
async fn newsletter_confirmation(email: &str, expected: StepStatus) {
    let driver = memory_driver();
    let (context, mut page) = home_page(&driver).await;
    let config = fast_config();

    let records = StepExecutor::new(page.as_mut(), BASE, &config)
        .execute(&newsletter(email))
        .await;

    assert_eq!(records[3].status, expected);
    if expected == StepStatus::Failed {
        let failure = records[3].failure.as_ref().unwrap();
        assert_eq!(failure.kind, "VisibilityAssertionFailed");
    }
    context.close().await.unwrap();
}

/// A click that opens a popup must be declared as such; a plain click on
/// the same link is a usage error.
#[tokio::test]
async fn popup_requires_prior_registration() {
    let driver = memory_driver();
    let (context, mut page) = home_page(&driver).await;
    let config = fast_config();
    let youtube = Locator::role("link", "Youtube");

    let mut executor = StepExecutor::new(page.as_mut(), BASE, &config);
    let plain = executor.execute(&[Step::Click { locator: youtube.clone() }]).await;
    assert_eq!(plain[0].status, StepStatus::Failed);
    assert_eq!(plain[0].failure.as_ref().unwrap().kind, "UnregisteredSurface");

    let declared = executor
        .execute(&[Step::ClickPopup {
            locator: youtube.clone(),
            expected_url: Some(TextMatch::pattern(r"youtube\.com", false)),
        }])
        .await;
    assert_eq!(declared[0].status, StepStatus::Passed);

    let wrong = executor
        .execute(&[Step::ClickPopup {
            locator: youtube,
            expected_url: Some(TextMatch::pattern(r"^https://x\.com/", false)),
        }])
        .await;
    assert_eq!(wrong[0].failure.as_ref().unwrap().kind, "UrlMismatch");

    context.close().await.unwrap();
}

/// Checking the URL twice on an unchanged page gives the same result and
/// issues no navigation.
#[tokio::test]
async fn assert_url_is_idempotent() {
    let driver = memory_driver();
    let (context, mut page) = home_page(&driver).await;
    let config = fast_config();
    let calls_before = driver.log().calls.len();

    let check = |expected: &str| Step::AssertUrl {
        expected: expected.into(),
    };
    let mut executor = StepExecutor::new(page.as_mut(), BASE, &config);
    let first = executor.execute(&[check("/"), check("/")]).await;
    let wrong = executor.execute(&[check("/tools/"), check("/tools/")]).await;

    assert!(first.iter().all(|r| r.status == StepStatus::Passed));
    assert_eq!(wrong[0].status, StepStatus::Failed);
    assert_eq!(wrong[0].failure.as_ref().unwrap().actual.as_deref(), Some("https://aiaxio.com/"));

    let log = driver.log();
    assert!(log.calls[calls_before..]
        .iter()
        .all(|(_, op)| !op.starts_with("goto") && !op.starts_with("click")));
    context.close().await.unwrap();
}

/// Resolving a locator twice without any page mutation yields the same
/// element set.
#[test_case(Locator::test_id("load-more-newly-released-tools") ; "duplicated test id")]
#[test_case(Locator::role("heading", TextMatch::pattern("^AI ", false)) ; "role with pattern")]
#[test_case(Locator::css("section a").unwrap() ; "css descendant")]
#[test_case(Locator::text("View All") ; "text")]
#[tokio::test]
async fn resolution_is_repeatable(locator: Locator) {
    let driver = memory_driver();
    let (context, mut page) = home_page(&driver).await;

    let first = resolve(&locator, &page.snapshot().await.unwrap()).unwrap();
    let second = resolve(&locator, &page.snapshot().await.unwrap()).unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
    context.close().await.unwrap();
}

/// The scoped load-more locator picks the button of its own section only.
#[tokio::test]
async fn scoped_load_more_is_unambiguous() {
    let driver = memory_driver();
    let (context, mut page) = home_page(&driver).await;
    let config = fast_config();

    let load_more = Locator::test_id("load-more-newly-released-tools")
        .within(Locator::css("section").unwrap().with_text("AI Coding Tools"));

    let records = StepExecutor::new(page.as_mut(), BASE, &config)
        .execute(&[
            Step::Click {
                locator: Locator::test_id("view-tools-AI Coding Tools"),
            },
            Step::Click { locator: load_more },
            Step::AssertVisible {
                locator: Locator::text("Lint Bot"),
            },
        ])
        .await;
    assert!(records.iter().all(|r| r.status == StepStatus::Passed), "{:?}", records);

    // Unscoped, the test id also matches the buttons of the other sections.
    let snapshot = page.snapshot().await.unwrap();
    assert_eq!(
        resolve(&Locator::test_id("load-more-newly-released-tools"), &snapshot)
            .unwrap()
            .len(),
        3
    );
    context.close().await.unwrap();
}
