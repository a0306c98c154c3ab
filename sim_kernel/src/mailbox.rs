//! Per-process mailboxes
//!
//! Messages are copied into the recipient's FIFO mailbox. The mailbox has
//! a soft depth: a sender that pushes it past the depth, or that asks to
//! wait, blocks until the recipient consumes its message. A recipient
//! with nothing to read can block until a message arrives.

use crate::scheduler::OpError;
use crate::state::KernelState;
use crate::Kernel;
use core_types::{Pid, ProcessState};
use kernel_api::KernelError;

#[derive(Debug)]
pub(crate) struct Message {
    pub(crate) data: Vec<u8>,
    /// Sender blocked until this message is consumed
    pub(crate) sender: Option<Pid>,
}

/// Result of one receive attempt
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Received {
    Message(Vec<u8>),
    Empty,
    /// The caller was blocked waiting for a message
    Blocked,
}

impl KernelState {
    /// Queues a copy of `data` for `target`
    ///
    /// Returns true when the sending process has been blocked.
    pub(crate) fn send(
        &mut self,
        sender: Option<Pid>,
        target: Pid,
        data: &[u8],
        wait: bool,
    ) -> Result<bool, KernelError> {
        let recipient = self.process(target)?;
        if recipient.state == ProcessState::Killed {
            return Err(KernelError::InvalidState {
                pid: target,
                state: recipient.state,
                operation: "send to",
            });
        }
        if wait && sender == Some(target) {
            return Err(KernelError::WouldDeadlock(target));
        }

        let over_depth = recipient.pending + 1 > self.config.mailbox_depth;
        let must_block = wait || over_depth;
        let blocked_sender = match sender {
            Some(pid) if must_block && pid != target => Some(pid),
            None if wait => return Err(KernelError::NotProcessContext),
            _ if over_depth => return Err(KernelError::MailboxFull(target)),
            _ => None,
        };

        let node = self.messages.insert(Message {
            data: data.to_vec(),
            sender: blocked_sender,
        });
        let recipient = self
            .procs
            .find_mut(target.handle())
            .ok_or(KernelError::ProcessNotFound(target))?;
        self.messages.queue(&mut recipient.mailbox, node);
        recipient.pending += 1;
        let waiting = recipient.state == ProcessState::WaitingToReceive;

        if waiting {
            self.ready(target)?;
        }
        if let Some(pid) = blocked_sender {
            self.block(pid, ProcessState::WaitingToSend);
            return Ok(true);
        }
        Ok(false)
    }

    /// Takes the oldest message of `pid`, or blocks it when asked to wait
    pub(crate) fn receive(&mut self, pid: Pid, wait: bool) -> Result<Received, KernelError> {
        let process = self
            .procs
            .find_mut(pid.handle())
            .ok_or(KernelError::ProcessNotFound(pid))?;
        let Some(node) = self.messages.pop(&mut process.mailbox) else {
            if !wait {
                return Ok(Received::Empty);
            }
            self.block(pid, ProcessState::WaitingToReceive);
            return Ok(Received::Blocked);
        };
        process.pending = process.pending.saturating_sub(1);

        let Some(message) = self.messages.remove(node) else {
            return Ok(Received::Empty);
        };
        if let Some(sender) = message.sender {
            let _ = self.ready(sender);
        }
        Ok(Received::Message(message.data))
    }

    /// Discards every pending message of `pid`; returns the blocked senders
    pub(crate) fn drain_mailbox(&mut self, pid: Pid) -> Vec<Pid> {
        let Some(process) = self.procs.find_mut(pid.handle()) else {
            return Vec::new();
        };
        let mut mailbox = std::mem::take(&mut process.mailbox);
        process.pending = 0;

        let mut senders = Vec::new();
        while let Some(node) = self.messages.pop(&mut mailbox) {
            if let Some(message) = self.messages.remove(node) {
                senders.extend(message.sender);
            }
        }
        senders
    }

    pub(crate) fn mailbox_len(&self, pid: Pid) -> Option<usize> {
        self.procs.find(pid.handle()).map(|process| process.pending)
    }
}

impl Kernel {
    /// Number of messages waiting for `pid`
    pub fn mailbox_len(&self, pid: Pid) -> Option<usize> {
        self.shared.lock().state.mailbox_len(pid)
    }

    pub(crate) fn msg_send_op(&self, target: Pid, data: &[u8], wait: bool) -> Result<(), OpError> {
        let mut section = self.enter()?;
        let sender = section.caller();
        if section.state.send(sender, target, data, wait)? {
            self.reschedule(&mut section)?;
        }
        Ok(())
    }

    pub(crate) fn msg_recv_op(&self, wait: bool) -> Result<Option<Vec<u8>>, OpError> {
        let (mut section, pid) = self.enter_process()?;
        loop {
            match section.state.receive(pid, wait)? {
                Received::Message(data) => return Ok(Some(data)),
                Received::Empty => return Ok(None),
                Received::Blocked => self.reschedule(&mut section)?,
            }
        }
    }
}
