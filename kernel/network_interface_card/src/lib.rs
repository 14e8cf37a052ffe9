#![no_std]

extern crate nic_buffers;

use nic_buffers::{ReceivedFrame, TransmitBuffer};


/// A trait that defines the necessary minimum functions that all network interface card (NIC) drivers
/// should implement.
pub trait NetworkInterfaceCard {
    /// Sends a packet contained in the given `transmit_buffer` out through this NetworkInterfaceCard.
    ///
    /// Drivers may queue the packet instead of posting it right away when their send ring is full;
    /// it is posted once the NIC has freed enough room.
    fn send_packet(&mut self, transmit_buffer: TransmitBuffer) -> Result<(), &'static str>;

    /// Returns the earliest `ReceivedFrame`, which is essentially a list of `ReceiveBuffer`s
    /// that each contain an individual piece of the frame.
    fn get_received_frame(&mut self) -> Option<ReceivedFrame>;

    /// Poll the NIC for received frames.
    /// Can be used as an alternative to interrupts, or as a supplement to interrupts.
    fn poll_receive(&mut self) -> Result<(), &'static str>;
}
