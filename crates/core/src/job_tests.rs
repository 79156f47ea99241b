use super::*;

#[test]
fn job_id_round_trips_through_display_and_parse() {
    let id = JobId::new();
    let parsed: JobId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn validate_rejects_empty_mountspecs() {
    let mut job = Job::test_default();
    job.mountspecs.clear();
    assert!(job.validate().is_err());
}

#[test]
fn validate_rejects_host_network_without_system_metadata() {
    let mut job = Job::test_default();
    job.config.host_network = true;
    let err = job.validate().unwrap_err();
    assert!(err.contains("host_network"));
}

#[test]
fn validate_allows_host_network_for_system_job() {
    let mut job = Job::test_default();
    job.config.host_network = true;
    job.metadata.insert("flynn-controller.type".into(), "system".into());
    assert!(job.validate().is_ok());
}

#[test]
fn validate_allows_host_pid_for_system_job_only() {
    let mut job = Job::test_default();
    job.config.host_pid_namespace = true;
    assert!(job.validate().is_err());
    job.metadata.insert("flynn-controller.type".into(), "system".into());
    assert!(job.validate().is_ok());
}

#[test]
fn is_system_checks_exact_metadata_value() {
    let mut job = Job::test_default();
    assert!(!job.is_system());
    job.metadata.insert("flynn-controller.type".into(), "web".into());
    assert!(!job.is_system());
    job.metadata.insert("flynn-controller.type".into(), "system".into());
    assert!(job.is_system());
}

#[test]
fn job_status_legal_transitions() {
    use JobStatus::*;
    assert!(Starting.can_transition_to(Running));
    assert!(Starting.can_transition_to(Done));
    assert!(Starting.can_transition_to(Failed));
    assert!(Running.can_transition_to(Done));
    assert!(Running.can_transition_to(Crashed));
    assert!(!Starting.can_transition_to(Crashed));
    assert!(!Running.can_transition_to(Starting));
    assert!(!Running.can_transition_to(Failed));
}

#[test]
fn terminal_statuses_have_no_legal_outgoing_transition() {
    for terminal in [JobStatus::Done, JobStatus::Crashed, JobStatus::Failed] {
        assert!(terminal.is_terminal());
        for next in [JobStatus::Starting, JobStatus::Running, JobStatus::Done, JobStatus::Crashed, JobStatus::Failed]
        {
            assert!(!terminal.can_transition_to(next));
        }
    }
}

#[test]
fn active_job_starts_in_starting_status() {
    let job = Job::test_default();
    let active = ActiveJob::new(job.clone(), "host-1", 1_000);
    assert_eq!(active.status, JobStatus::Starting);
    assert_eq!(active.id(), job.id);
    assert!(!active.force_stop);
}

#[test]
fn job_config_builder_sets_fields() {
    let cfg = JobConfig::builder()
        .args(vec!["sleep".to_string(), "1".to_string()])
        .working_dir("/app")
        .host_network(true)
        .build();
    assert_eq!(cfg.args, vec!["sleep", "1"]);
    assert_eq!(cfg.working_dir.as_deref(), Some("/app"));
    assert!(cfg.host_network);
}
