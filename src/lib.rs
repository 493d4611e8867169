/*!
An OpenFlow 1.2/1.3 forwarding element.

Toward its controllers the element is a datapath with flow tables, a group
table and ports of its own. Toward the datapaths attached below it the
element is a controller. In proxy mode it passes what its controllers
configure on to those datapaths, so elements can be stacked.
*/

#[macro_use]
extern crate log;
extern crate byteorder;
extern crate ini;
extern crate ipnetwork;
extern crate rand;

pub mod conf;
pub mod flowtable;
pub mod fwdelem;
pub mod grouptable;
pub mod openflow;
pub mod packet;
pub mod pipeline;
pub mod proxy;
pub mod timer;
pub mod transport;
