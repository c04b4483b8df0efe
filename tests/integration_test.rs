//! Integration tests for sleet

use clap::Parser;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use sleet::config::{CliArgs, FileConfig};
use sleet::error::{KeyError, PipelineError};
use sleet::{SplitConfig, SplitStats, run_split};

/// A staging directory and a local output directory for one run.
struct Workspace {
    staging: TempDir,
    output: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            staging: TempDir::new().unwrap(),
            output: TempDir::new().unwrap(),
        }
    }

    fn output_base(&self) -> String {
        format!("{}/reduce.", self.output.path().display())
    }

    fn config(&self, argv: &[&str]) -> SplitConfig {
        let base = self.output_base();
        let mut full = vec!["sleet", "--output-base", base.as_str()];
        full.extend_from_slice(argv);
        let file = FileConfig {
            staging_dir: Some(self.staging.path().to_path_buf()),
            ..FileConfig::default()
        };
        CliArgs::try_parse_from(full)
            .unwrap()
            .validate_with(file)
            .unwrap()
    }

    fn object_path(&self, stats: &SplitStats, bucket: usize) -> PathBuf {
        self.output
            .path()
            .join(format!("reduce.{}.{bucket}", stats.run_id))
    }

    fn object(&self, stats: &SplitStats, bucket: usize) -> String {
        std::fs::read_to_string(self.object_path(stats, bucket)).unwrap()
    }

    fn output_files(&self) -> usize {
        count_files(self.output.path())
    }

    fn staging_files(&self) -> usize {
        count_files(self.staging.path())
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_shares_bucket_in_order() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "2", "-d", ",", "-f", "1"]);

        let stats = run_split(&config, &b"a,1\nb,2\na,3\n"[..]).await.unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.objects_uploaded(), 2);

        let a_bucket = sleet::partition::hash_bucket(b"a", 2);
        let contents = ws.object(&stats, a_bucket);
        let first = contents.find("a,1\n").unwrap();
        let third = contents.find("a,3\n").unwrap();
        assert!(first < third);
    }

    #[tokio::test]
    async fn test_every_record_lands_exactly_once() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "7", "-f", "2"]);

        let input: String = (0..500).map(|i| format!("{i}\tuser-{}\n", i % 37)).collect();
        let stats = run_split(&config, input.as_bytes()).await.unwrap();

        assert_eq!(stats.records, 500);
        assert_eq!(stats.bucket_records.iter().sum::<u64>(), 500);

        let mut lines = Vec::new();
        for bucket in 0..7 {
            let contents = ws.object(&stats, bucket);
            assert_eq!(contents.lines().count() as u64, stats.bucket_records[bucket]);

            // Per-bucket order follows input order.
            let ids: Vec<u32> = contents
                .lines()
                .map(|l| l.split('\t').next().unwrap().parse().unwrap())
                .collect();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            lines.extend(contents.lines().map(str::to_string));
        }

        lines.sort();
        let mut expected: Vec<String> = input.lines().map(str::to_string).collect();
        expected.sort();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_empty_buckets_still_uploaded() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "4", "-i", "-f", "1"]);

        let stats = run_split(&config, &b"3\tx\n"[..]).await.unwrap();
        assert_eq!(ws.output_files(), 4);
        assert_eq!(ws.object(&stats, 0), "");
        assert_eq!(ws.object(&stats, 3), "3\tx\n");
    }

    #[tokio::test]
    async fn test_empty_input_uploads_empty_objects() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "3", "-f", "1"]);

        let stats = run_split(&config, &b""[..]).await.unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(ws.output_files(), 3);
        assert_eq!(ws.staging_files(), 0);
    }

    #[tokio::test]
    async fn test_trailing_record_gets_terminator() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "1", "-f", "1"]);

        let stats = run_split(&config, &b"one\ntwo"[..]).await.unwrap();
        assert_eq!(ws.object(&stats, 0), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_missing_fields_hash_as_empty_key() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "5", "-f", "4,9"]);

        let stats = run_split(&config, &b"a\tb\nc\n"[..]).await.unwrap();
        let bucket = sleet::partition::hash_bucket(b"", 5);
        assert_eq!(ws.object(&stats, bucket), "a\tb\nc\n");
    }

    #[tokio::test]
    async fn test_json_paths() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "3", "-i", "-j", "-f", "route.bucket"]);

        let input = concat!(
            "{\"route\":{\"bucket\":2},\"v\":1}\n",
            "{\"route\":{\"bucket\":0},\"v\":2}\n",
            "{\"route\":{\"bucket\":2},\"v\":3}\n",
        );
        let stats = run_split(&config, input.as_bytes()).await.unwrap();

        assert_eq!(stats.bucket_records, vec![1, 0, 2]);
        assert!(ws.object(&stats, 2).contains("\"v\":3"));
    }

    #[tokio::test]
    async fn test_expression_over_document() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "2", "-i", "-j", "-e", "this.size > 100 ? 1 : 0"]);

        let input = "{\"size\":5}\n{\"size\":500}\n{\"size\":50}\n";
        let stats = run_split(&config, input.as_bytes()).await.unwrap();

        assert_eq!(ws.object(&stats, 0), "{\"size\":5}\n{\"size\":50}\n");
        assert_eq!(ws.object(&stats, 1), "{\"size\":500}\n");
    }

    #[tokio::test]
    async fn test_small_high_water_mark_still_routes_everything() {
        let ws = Workspace::new();
        let base = ws.output_base();
        let file = FileConfig {
            staging_dir: Some(ws.staging.path().to_path_buf()),
            sink_high_water_mark: 16,
            ..FileConfig::default()
        };
        let config = CliArgs::try_parse_from(["sleet", "--output-base", base.as_str(), "-n", "3", "-f", "1"])
            .unwrap()
            .validate_with(file)
            .unwrap();

        let input: String = (0..200).map(|i| format!("key{}\t{}\n", i % 5, "x".repeat(40))).collect();
        let stats = run_split(&config, input.as_bytes()).await.unwrap();

        assert_eq!(stats.records, 200);
        assert!(stats.input_pauses > 0);
        let total: usize = (0..3).map(|b| ws.object(&stats, b).lines().count()).sum();
        assert_eq!(total, 200);
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_integer_bucket_out_of_range() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "3", "-i", "-f", "1"]);

        let err = run_split(&config, &b"1\n5\n"[..]).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
        match &err {
            PipelineError::Record { line, source, .. } => {
                assert_eq!(*line, 2);
                assert!(matches!(
                    source,
                    KeyError::BucketOutOfRange {
                        bucket: 5,
                        reducers: 3
                    }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("bucket 5"));
        assert_eq!(ws.output_files(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_uploads_nothing() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "2", "-j", "-f", "id"]);

        let err = run_split(&config, &b"{\"id\":1}\nnot json\n"[..])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Record {
                line: 2,
                source: KeyError::MalformedJson { .. },
                ..
            }
        ));
        assert!(err.to_string().contains("not json"));
        assert_eq!(ws.output_files(), 0);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_fatal() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "2", "-f", "1"]);

        let err = run_split(&config, &b"ok\n\xc3\x28\n"[..]).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidUtf8 { line: 2 }));
        assert_eq!(ws.output_files(), 0);
    }

    #[tokio::test]
    async fn test_expression_type_error_is_fatal() {
        let ws = Workspace::new();
        let config = ws.config(&["-n", "2", "-e", "len(line)"]);

        let err = run_split(&config, &b"abc\n"[..]).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Record {
                source: KeyError::InvalidKeyType { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_staging_dir_is_fatal() {
        let ws = Workspace::new();
        let base = ws.output_base();
        let file = FileConfig {
            staging_dir: Some(ws.staging.path().join("does-not-exist")),
            ..FileConfig::default()
        };
        let config = CliArgs::try_parse_from(["sleet", "--output-base", base.as_str(), "-n", "2", "-f", "1"])
            .unwrap()
            .validate_with(file)
            .unwrap();

        let err = run_split(&config, &b"a\n"[..]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Sink { .. }));
        assert_eq!(err.exit_code(), 1);
    }
}
