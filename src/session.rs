//! Operator session: the caller-owned context behind every operator action.
//!
//! Holds the current stage selection, the staged stage record and global
//! config being edited, and handles to the two stores and the transport.
//! Nothing is saved or sent implicitly; each action maps to one method.

use std::ops::Range;

use crate::config_loader::TunerSettings;
use crate::error::{Result, TunerError};
use crate::globals::{GlobalConfig, GlobalStore};
use crate::protocol;
use crate::schema::ProtocolVersion;
use crate::stage::{PidGains, StageRecord};
use crate::store::StageStore;
use crate::transport::{ChannelOpener, SerialOpener, Transport};

pub struct Session<O: ChannelOpener = SerialOpener> {
    version: ProtocolVersion,
    stages: StageStore,
    globals: GlobalStore,
    transport: Transport<O>,
    current_stage: Option<usize>,
    staged: StageRecord,
    config: GlobalConfig,
}

impl Session<SerialOpener> {
    pub fn from_settings(settings: &TunerSettings) -> Self {
        Session::new(
            settings.protocol,
            StageStore::new(&settings.stage_file, settings.protocol),
            GlobalStore::new(&settings.globals_file, settings.protocol),
            Transport::new(settings.serial_opener()),
        )
    }
}

impl<O: ChannelOpener> Session<O> {
    pub fn new(version: ProtocolVersion, stages: StageStore, globals: GlobalStore, transport: Transport<O>) -> Self {
        Self {
            version,
            stages,
            globals,
            transport,
            current_stage: None,
            staged: StageRecord::default(),
            config: GlobalConfig::default_for(version),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn stage_store(&self) -> &StageStore {
        &self.stages
    }

    pub fn global_store(&self) -> &GlobalStore {
        &self.globals
    }

    pub fn transport(&self) -> &Transport<O> {
        &self.transport
    }

    /// Create both files with defaults. Existing files are kept unless `force`.
    pub fn initialize(&self, force: bool) -> Result<(bool, bool)> {
        Ok((self.stages.initialize(force)?, self.globals.initialize(force)?))
    }

    // -------------------- stage selection --------------------

    pub fn current_stage(&self) -> Option<usize> {
        self.current_stage
    }

    /// Select the stage subsequent load/save/send actions apply to.
    /// Rejects out-of-range indices; clamping is the caller's choice.
    pub fn select_stage(&mut self, index: usize) -> Result<()> {
        self.stages.check_index(index)?;
        self.current_stage = Some(index);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.current_stage = None;
    }

    fn selected(&self) -> Result<usize> {
        self.current_stage.ok_or(TunerError::Unselected)
    }

    /// The staged record, as last loaded or edited.
    pub fn staged(&self) -> &StageRecord {
        &self.staged
    }

    /// Read the selected stage from the store into the staged record.
    pub fn load_stage(&mut self) -> Result<&StageRecord> {
        let index = self.selected()?;
        self.staged = self.stages.load(index)?;
        Ok(&self.staged)
    }

    /// Mutable access to the staged record; requires a selection.
    pub fn edit_stage(&mut self) -> Result<&mut StageRecord> {
        self.selected()?;
        Ok(&mut self.staged)
    }

    /// Commit the staged record to the selected stage's line.
    pub fn save_stage(&mut self) -> Result<()> {
        let index = self.selected()?;
        self.stages.save(index, &self.staged)
    }

    /// Stage command frame for the staged record at the selected index.
    pub fn encode_stage(&self) -> Result<Vec<u8>> {
        let index = self.selected()?;
        protocol::encode_stage(self.version, index, &self.staged)
    }

    pub fn send_stage(&self) -> Result<()> {
        let frame = self.encode_stage()?;
        log::info!(target: "session", "Sending stage {} ({} protocol)", self.selected()?, self.version);
        self.transport.send(&frame)
    }

    // -------------------- globals --------------------

    /// Indices offered as start positions.
    pub fn start_positions(&self) -> Range<usize> {
        0..self.stages.stage_count()
    }

    pub fn globals(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn load_globals(&mut self) -> Result<&GlobalConfig> {
        self.config = self.globals.load()?;
        Ok(&self.config)
    }

    pub fn set_start_position(&mut self, index: usize) -> Result<()> {
        self.stages.check_index(index)?;
        self.config.start_position = index;
        Ok(())
    }

    /// Set the course-wide gains; only the legacy protocol carries them.
    pub fn set_global_gains(&mut self, gains: PidGains) -> Result<()> {
        if self.version != ProtocolVersion::Legacy {
            return Err(TunerError::FrameUnsupported { tag: 'g', version: self.version });
        }
        self.config.gains = Some(gains);
        Ok(())
    }

    pub fn save_globals(&self) -> Result<()> {
        self.globals.save(&self.config)
    }

    pub fn encode_globals(&self) -> Result<Vec<u8>> {
        protocol::encode_globals(self.version, &self.config)
    }

    pub fn send_globals(&self) -> Result<()> {
        let frame = self.encode_globals()?;
        log::info!(target: "session", "Sending globals: start position {}", self.config.start_position);
        self.transport.send(&frame)
    }

    // -------------------- live tuning --------------------

    /// Send an ephemeral PID triple straight to the controller.
    pub fn send_live_pid(&self, gains: &PidGains) -> Result<()> {
        let frame = protocol::encode_live_pid(self.version, gains)?;
        log::info!(target: "session", "Sending live PID p={} i={} d={}", gains.p, gains.i, gains.d);
        self.transport.send(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{FollowMode, TerminationAction, TerminationCondition};
    use crate::transport::tests::FakeOpener;

    fn session(dir: &tempfile::TempDir, version: ProtocolVersion) -> (Session<FakeOpener>, FakeOpener) {
        let opener = FakeOpener::default();
        let session = Session::new(
            version,
            StageStore::new(dir.path().join("positions.txt"), version),
            GlobalStore::new(dir.path().join("globals.txt"), version),
            Transport::new(opener.clone()),
        );
        assert_eq!(session.initialize(false).unwrap(), (true, true));
        (session, opener)
    }

    #[test]
    fn test_stage_actions_require_selection() {
        let temp = tempfile::tempdir().unwrap();
        let (mut session, opener) = session(&temp, ProtocolVersion::Extended);
        let before = std::fs::read_to_string(session.stage_store().path()).unwrap();

        assert!(matches!(session.load_stage(), Err(TunerError::Unselected)));
        assert!(matches!(session.edit_stage(), Err(TunerError::Unselected)));
        assert!(matches!(session.save_stage(), Err(TunerError::Unselected)));
        assert!(matches!(session.send_stage(), Err(TunerError::Unselected)));

        assert_eq!(std::fs::read_to_string(session.stage_store().path()).unwrap(), before);
        assert!(opener.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_select_rejects_out_of_range() {
        let temp = tempfile::tempdir().unwrap();
        let (mut session, _) = session(&temp, ProtocolVersion::Legacy);
        assert!(matches!(session.select_stage(38), Err(TunerError::OutOfRange { .. })));
        assert_eq!(session.current_stage(), None);
        session.select_stage(37).unwrap();
        assert_eq!(session.current_stage(), Some(37));
        session.clear_selection();
        assert!(matches!(session.save_stage(), Err(TunerError::Unselected)));
    }

    #[test]
    fn test_edit_save_load_send_stage() {
        let temp = tempfile::tempdir().unwrap();
        let (mut session, opener) = session(&temp, ProtocolVersion::Extended);
        session.select_stage(7).unwrap();
        {
            let record = session.edit_stage().unwrap();
            record.follow_mode = FollowMode::EncoderDriven;
            record.termination = TerminationCondition::Intersection;
            record.termination_action = TerminationAction::Turn;
            record.left_amount = 10;
            record.right_amount = -5;
            record.speed = 80;
            record.turn_speed = 40;
            record.gains = PidGains::new(1.5, 0.2, 0.05);
        }
        let edited = *session.staged();
        session.save_stage().unwrap();

        session.select_stage(8).unwrap();
        assert_eq!(*session.load_stage().unwrap(), StageRecord::default());
        session.select_stage(7).unwrap();
        assert_eq!(*session.load_stage().unwrap(), edited);

        session.send_stage().unwrap();
        let written = opener.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0], protocol::encode_stage(ProtocolVersion::Extended, 7, &edited).unwrap());
    }

    #[test]
    fn test_out_of_range_value_is_never_sent() {
        let temp = tempfile::tempdir().unwrap();
        let (mut session, opener) = session(&temp, ProtocolVersion::Extended);
        session.select_stage(1).unwrap();
        session.edit_stage().unwrap().speed = 400;
        assert!(matches!(session.send_stage(), Err(TunerError::EncodingRange { .. })));
        assert_eq!(opener.opened.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_globals_round_trip_and_send() {
        let temp = tempfile::tempdir().unwrap();
        let (mut session, opener) = session(&temp, ProtocolVersion::Extended);
        assert_eq!(session.start_positions(), 0..40);
        session.set_start_position(5).unwrap();
        session.save_globals().unwrap();
        session.set_start_position(9).unwrap();
        assert_eq!(session.load_globals().unwrap().start_position, 5);

        session.send_globals().unwrap();
        assert_eq!(*opener.written.lock().unwrap(), vec![vec![b'g', 5]]);

        assert!(matches!(session.set_start_position(40), Err(TunerError::OutOfRange { .. })));
        assert!(matches!(
            session.set_global_gains(PidGains::default()),
            Err(TunerError::FrameUnsupported { .. })
        ));
    }

    #[test]
    fn test_legacy_globals_and_live_pid() {
        let temp = tempfile::tempdir().unwrap();
        let (mut session, opener) = session(&temp, ProtocolVersion::Legacy);
        session.set_global_gains(PidGains::new(1.0, 0.1, 0.01)).unwrap();
        session.set_start_position(3).unwrap();
        session.save_globals().unwrap();
        let loaded = *session.load_globals().unwrap();
        assert_eq!(loaded.gains, Some(PidGains::new(1.0, 0.1, 0.01)));
        assert_eq!(loaded.start_position, 3);

        session.send_live_pid(&PidGains::new(2.0, 0.0, 0.5)).unwrap();
        let written = opener.written.lock().unwrap();
        assert_eq!(written[0].len(), 13);
        assert_eq!(written[0][0], b'd');
    }

    #[test]
    fn test_live_pid_rejected_by_extended_session() {
        let temp = tempfile::tempdir().unwrap();
        let (session, opener) = session(&temp, ProtocolVersion::Extended);
        assert!(matches!(
            session.send_live_pid(&PidGains::default()),
            Err(TunerError::FrameUnsupported { tag: 'd', .. })
        ));
        assert_eq!(opener.opened.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
