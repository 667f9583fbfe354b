use mado::{
    manifest::Addressing, HttpClient, HttpManifestSource, HttpProber, MadoError, ManifestSource,
    Prober,
};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::AssertWrapper;

const LIVE_MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" profiles="urn:mpeg:dash:profile:isoff-live:2011"
     availabilityStartTime="2024-01-01T00:00:00Z" minimumUpdatePeriod="PT2S" timeShiftBufferDepth="PT30S">
  <Period id="0" start="PT0S">
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate media="$RepresentationID$/segment_$Number$.m4s" initialization="$RepresentationID$/init.mp4" timescale="1000" duration="2000" startNumber="1"/>
      <Representation id="720p" bandwidth="3000000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mado=trace,wiremock=debug")
        .try_init();
}

fn client() -> HttpClient {
    HttpClient::new(reqwest::Client::builder()).assert_success()
}

async fn setup_mock_server(body: &str) -> (Url, MockServer) {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/live/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let url = Url::parse(&format!("{}/live/manifest.mpd", mock_server.uri())).unwrap();
    (url, mock_server)
}

#[tokio::test]
async fn test_manifest_source_resolves_against_mpd_url() -> anyhow::Result<()> {
    init_test_tracing();
    let (url, mock_server) = setup_mock_server(LIVE_MPD).await;

    let source = HttpManifestSource::new(client(), url);
    let snapshot = source.fetch().await.assert_success();

    assert_eq!(snapshot.minimum_update_period, Some(chrono::TimeDelta::seconds(2)));
    assert_eq!(snapshot.ignored_periods, 0);
    let representation = &snapshot.period.adaptation_sets[0].representations[0];
    assert_eq!(representation.id.as_deref(), Some("720p"));
    assert_eq!(
        representation.media.0,
        format!(
            "{}/live/$RepresentationID$/segment_$Number$.m4s",
            mock_server.uri()
        )
    );
    assert_eq!(
        representation.addressing,
        Addressing::Number {
            duration: 2000.0,
            timescale: 1000
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_manifest_source_skips_later_periods() -> anyhow::Result<()> {
    let body = LIVE_MPD.replace(
        "</MPD>",
        r#"  <Period id="ad" duration="PT30S">
    <AdaptationSet mimeType="video/mp4">
      <Representation id="ad" bandwidth="1000000">
        <BaseURL>ad.mp4</BaseURL>
        <SegmentBase indexRange="0-1000"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#,
    );
    let (url, _mock_server) = setup_mock_server(&body).await;

    let source = HttpManifestSource::new(client(), url);
    let snapshot = source.fetch().await.assert_success();

    assert_eq!(snapshot.period.id.as_deref(), Some("0"));
    assert_eq!(snapshot.ignored_periods, 1);

    Ok(())
}

#[tokio::test]
async fn test_manifest_source_rejects_error_status() -> anyhow::Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/live/manifest.mpd"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let url = Url::parse(&format!("{}/live/manifest.mpd", mock_server.uri()))?;
    let source = HttpManifestSource::new(client(), url);
    let error = source.fetch().await.unwrap_err();

    assert!(matches!(error, MadoError::HttpError(status) if status.as_u16() == 503));
    assert!(!error.is_fatal());

    Ok(())
}

#[tokio::test]
async fn test_manifest_source_rejects_malformed_mpd() -> anyhow::Result<()> {
    let (url, _mock_server) = setup_mock_server("<MPD").await;

    let source = HttpManifestSource::new(client(), url);
    source.fetch().await.assert_error();

    Ok(())
}

#[tokio::test]
async fn test_prober_reads_server_date() -> anyhow::Result<()> {
    init_test_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/live/720p/segment_5.m4s"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Date", "Mon, 01 Jan 2024 00:00:12 GMT"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let prober = HttpProber::new(client());
    let url = Url::parse(&format!("{}/live/720p/segment_5.m4s", mock_server.uri()))?;
    let response = prober.probe(&url).await.assert_success();

    assert!(response.is_success());
    assert_eq!(
        response.server_time.assert_success().to_rfc3339(),
        "2024-01-01T00:00:12+00:00"
    );

    Ok(())
}

#[tokio::test]
async fn test_prober_reports_missing_segment() -> anyhow::Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let prober = HttpProber::new(client());
    let url = Url::parse(&format!("{}/live/720p/segment_6.m4s", mock_server.uri()))?;
    let response = prober.probe(&url).await.assert_success();

    assert_eq!(response.status, 404);
    assert!(!response.is_success());

    Ok(())
}

#[tokio::test]
async fn test_prober_shares_cookies() -> anyhow::Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(wiremock::matchers::header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let client = client();
    let url = Url::parse(&format!("{}/live/720p/segment_7.m4s", mock_server.uri()))?;
    client.add_cookies(vec!["session=abc".to_string()], &url);

    let response = HttpProber::new(client).probe(&url).await.assert_success();
    assert_eq!(response.status, 200);

    Ok(())
}
